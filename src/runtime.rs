// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Single-writer engine service
//!
//! The engine lives on one blocking task and drains a command queue in
//! order. Rendering and cluster fetches run on other blocking tasks and
//! re-enter the queue as ordinary commands carrying their generation, so a
//! late result can never interleave with a mutation in progress.

use crate::cluster::ClusterClient;
use crate::engine::{Command, Engine, ExternalRequest, ExternalWork, FetchPurpose, Outcome};
use crate::error::{EngineError, Result};
use crate::kinds::KindRegistry;
use crate::render::PreviewRenderer;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Reply = oneshot::Sender<Result<Outcome>>;
type Query = Box<dyn FnOnce(&Engine) + Send>;

enum Message {
    Dispatch {
        command: Command,
        settle: bool,
        prior: Option<Outcome>,
        reply: Option<Reply>,
    },
    Query(Query),
}

/// Cloneable handle for sending commands to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Message>,
}

/// A running engine service
pub struct EngineService {
    handle: EngineHandle,
    task: JoinHandle<Engine>,
}

struct Workers {
    runtime: Handle,
    renderer: Arc<dyn PreviewRenderer>,
    cluster: Option<Arc<dyn ClusterClient>>,
    registry: KindRegistry,
    tx: mpsc::WeakSender<Message>,
}

impl EngineService {
    /// Start the engine loop; must be called inside a tokio runtime
    #[must_use]
    pub fn spawn(engine: Engine, renderer: Arc<dyn PreviewRenderer>) -> Self {
        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let workers = Workers {
            runtime: Handle::current(),
            renderer,
            cluster: engine.cluster_client(),
            registry: engine.registry().clone(),
            tx: tx.downgrade(),
        };

        let task = tokio::task::spawn_blocking(move || {
            let mut engine = engine;
            info!("Engine service started");
            while let Some(message) = rx.blocking_recv() {
                match message {
                    Message::Dispatch {
                        command,
                        settle,
                        prior,
                        reply,
                    } => {
                        let result = engine.dispatch(command);
                        workers.finish(result, settle, prior, reply);
                    }
                    Message::Query(query) => query(&engine),
                }
            }
            info!("Engine service stopped");
            engine
        });

        Self {
            handle: EngineHandle { tx },
            task,
        }
    }

    /// Handle for sending commands
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop accepting commands and hand the engine back once the queue drains
    pub async fn shutdown(self) -> Result<Engine> {
        drop(self.handle);
        self.task.await.map_err(|_| EngineError::ServiceStopped)
    }
}

impl Workers {
    fn finish(&self, result: Result<Outcome>, settle: bool, prior: Option<Outcome>, reply: Option<Reply>) {
        let result = result.map(|outcome| merge(prior, outcome));
        let (result, reply) = match result {
            Ok(mut outcome) => match outcome.request.take() {
                Some(request) if settle => {
                    self.start(request, Some(outcome), reply);
                    return;
                }
                Some(request) => {
                    self.start(request.clone(), None, None);
                    outcome.request = Some(request);
                    (Ok(outcome), reply)
                }
                None => (Ok(outcome), reply),
            },
            Err(err) => (Err(err), reply),
        };
        if let Some(reply) = reply {
            // The caller may have stopped waiting
            let _ = reply.send(result);
        }
    }

    fn start(&self, request: ExternalRequest, prior: Option<Outcome>, reply: Option<Reply>) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let renderer = Arc::clone(&self.renderer);
        let cluster = self.cluster.clone();
        let registry = self.registry.clone();
        debug!(generation = request.generation, "Starting external work");
        self.runtime.spawn_blocking(move || {
            let command = run_work(request, renderer.as_ref(), cluster.as_deref(), &registry);
            let message = Message::Dispatch {
                command,
                settle: reply.is_some(),
                prior,
                reply,
            };
            if tx.blocking_send(message).is_err() {
                error!("Engine stopped before external work completed");
            }
        });
    }
}

fn merge(prior: Option<Outcome>, mut outcome: Outcome) -> Outcome {
    if let Some(mut prior) = prior {
        prior.diagnostics.append(&mut outcome.diagnostics);
        outcome.diagnostics = prior.diagnostics;
        outcome.created = outcome.created.or(prior.created);
    }
    outcome
}

/// Perform one piece of external work and turn its result into the command that delivers it
pub fn run_work(
    request: ExternalRequest,
    renderer: &dyn PreviewRenderer,
    cluster: Option<&dyn ClusterClient>,
    registry: &KindRegistry,
) -> Command {
    let generation = request.generation;
    match request.work {
        ExternalWork::RenderKustomization { dir } => Command::PreviewLoaded {
            generation,
            result: renderer.render_kustomization(&dir).map_err(|e| e.to_string()),
        },
        ExternalWork::RenderHelm { chart_dir, values_file } => Command::PreviewLoaded {
            generation,
            result: renderer
                .render_helm(&chart_dir, &values_file)
                .map_err(|e| e.to_string()),
        },
        ExternalWork::FetchCluster { context, purpose } => {
            let result = match cluster {
                Some(client) => client.list_resources(&context, registry).map_err(|e| e.to_string()),
                None => Err("no cluster client configured".to_string()),
            };
            match purpose {
                FetchPurpose::Preview => Command::PreviewLoaded { generation, result },
                FetchPurpose::Diff => Command::ClusterDiffLoaded {
                    generation,
                    context,
                    result,
                },
            }
        }
    }
}

impl EngineHandle {
    async fn send(&self, command: Command, settle: bool) -> Result<Outcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Dispatch {
                command,
                settle,
                prior: None,
                reply: Some(reply),
            })
            .await
            .map_err(|_| EngineError::ServiceStopped)?;
        rx.await.map_err(|_| EngineError::ServiceStopped)?
    }

    /// Apply a command; any external work it starts runs in the background
    pub async fn dispatch(&self, command: Command) -> Result<Outcome> {
        self.send(command, false).await
    }

    /// Apply a command and wait for the external work it starts to be applied too
    pub async fn dispatch_and_settle(&self, command: Command) -> Result<Outcome> {
        self.send(command, true).await
    }

    /// Read engine state between commands
    pub async fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let query: Query = Box::new(move |engine| {
            let _ = reply.send(f(engine));
        });
        self.tx
            .send(Message::Query(query))
            .await
            .map_err(|_| EngineError::ServiceStopped)?;
        rx.await.map_err(|_| EngineError::ServiceStopped)
    }
}
