//! The Faust language server over tower-lsp.
//!
//! This crate wires the analysis engine from `faustlsp-core` to an editor:
//! the LSP backend and its lifecycle, the workspace mirror that keeps the
//! editor buffers, the file store and the compiler's temp replica in sync,
//! the diagnostics publisher and the external compiler/formatter runners.

pub mod backend;
mod compiler;
mod completion;
mod definition;
mod diagnostics;
mod formatting;
mod hover;
mod symbols;
pub mod workspace;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_lsp::{ClientSocket, LspService, Server};

pub use backend::Backend;

fn build_service() -> (LspService<Backend>, ClientSocket, Arc<AtomicBool>) {
    let clean_exit = Arc::new(AtomicBool::new(false));
    let flag = clean_exit.clone();
    let (service, socket) = LspService::new(move |client| Backend::new(client, flag.clone()));
    (service, socket, clean_exit)
}

/// Serves one editor session over stdio. Returns whether the client went
/// through the shutdown handshake before the stream ended.
pub async fn run_stdio() -> bool {
    let (service, socket, clean_exit) = build_service();
    Server::new(tokio::io::stdin(), tokio::io::stdout(), socket)
        .serve(service)
        .await;
    clean_exit.load(Ordering::SeqCst)
}

/// Serves one editor session over a TCP socket.
pub async fn run_socket(port: u16) -> anyhow::Result<bool> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("couldn't bind tcp port {port}"))?;
    log::info!("listening on 127.0.0.1:{port}");

    let (stream, peer) = listener.accept().await.context("accept failed")?;
    log::info!("client connected from {peer}");

    let (read, write) = tokio::io::split(stream);
    let (service, socket, clean_exit) = build_service();
    Server::new(read, write, socket).serve(service).await;
    Ok(clean_exit.load(Ordering::SeqCst))
}
