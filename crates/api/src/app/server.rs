//! Runs the HTTP server side by side with the create-user consumer.
//!
//! Whichever ends first ends both. A shutdown signal, a server error and the consumer
//! stopping on its own all flip the shutdown channel, drain the server and return.

use std::future::{Future, IntoFuture};

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use lure_infra::consumer::ConsumerError;

pub type ConsumerTask = JoinHandle<Result<(), ConsumerError>>;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("http server failed: {0}")]
    Http(#[from] std::io::Error),

    #[error("create-user consumer failed: {0}")]
    Consumer(ConsumerError),

    #[error("create-user consumer stopped without a shutdown request")]
    ConsumerExited,

    #[error("create-user consumer task failed: {0}")]
    ConsumerTask(String),
}

enum Exit {
    Signal,
    Server(std::io::Result<()>),
    Consumer(Result<Result<(), ConsumerError>, JoinError>),
}

/// Serve `app` until `signal` resolves, the server fails, or `consumer` ends.
///
/// `shutdown` is flipped to `true` on the way out; the consumer must watch it.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    mut consumer: Option<ConsumerTask>,
    shutdown: watch::Sender<bool>,
    signal: F,
) -> Result<(), ServeError>
where
    F: Future<Output = ()>,
{
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(stopped(shutdown.subscribe()))
        .into_future();
    tokio::pin!(server);
    tokio::pin!(signal);

    let exit = tokio::select! {
        () = &mut signal => Exit::Signal,
        served = &mut server => Exit::Server(served),
        joined = consumer_exit(&mut consumer) => Exit::Consumer(joined),
    };

    shutdown.send_replace(true);

    match exit {
        Exit::Signal => {
            info!("shutdown requested");
            server.await?;
            finish_consumer(consumer).await;
            Ok(())
        }
        Exit::Server(served) => {
            finish_consumer(consumer).await;
            served.map_err(ServeError::from)
        }
        Exit::Consumer(joined) => {
            let err = consumer_failure(joined);
            error!(error = %err, "create-user consumer ended, shutting down");
            server.await?;
            Err(err)
        }
    }
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn consumer_exit(
    consumer: &mut Option<ConsumerTask>,
) -> Result<Result<(), ConsumerError>, JoinError> {
    match consumer {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn finish_consumer(consumer: Option<ConsumerTask>) {
    let Some(task) = consumer else {
        return;
    };

    match task.await {
        Ok(Ok(())) | Ok(Err(ConsumerError::Stopped)) => info!("create-user consumer stopped"),
        Ok(Err(e)) => error!(error = %e, "create-user consumer failed"),
        Err(e) => error!(error = %e, "create-user consumer task failed"),
    }
}

fn consumer_failure(joined: Result<Result<(), ConsumerError>, JoinError>) -> ServeError {
    match joined {
        Ok(Ok(())) | Ok(Err(ConsumerError::Stopped)) => ServeError::ConsumerExited,
        Ok(Err(e)) => ServeError::Consumer(e),
        Err(e) => ServeError::ConsumerTask(e.to_string()),
    }
}
