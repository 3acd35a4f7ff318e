//! Voice session adapter
//!
//! Bridges recognized utterance text to the analysis router and hands the
//! replies to a speech sink. Each session owns one worker task that answers
//! utterances in receipt order with at most one turn in flight.

pub mod token;

use crate::agent::AnalysisRouter;
use crate::classifier::{detect_interruption, Interruption};
use crate::error::AssistantError;
use crate::models::{Reply, ReplyKind};
use crate::store::SessionContext;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use token::{IssuedToken, LiveKitConfig, TokenIssuer};

pub const DEFAULT_RESPONSE_BUDGET: Duration = Duration::from_millis(1500);

const STILL_WORKING_TEXT: &str = "Still working on that…";
const CANCELLED_TEXT: &str = "Okay, I've stopped.";
const INBOX_CAPACITY: usize = 32;

/// Produces the reply for one utterance.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, utterance: &str) -> Reply;
}

/// Text-to-speech collaborator.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, reply: &Reply) -> Result<()>;
}

/// The router bound to one session.
pub struct SessionTurnHandler {
    router: Arc<AnalysisRouter>,
    session: Arc<SessionContext>,
}

impl SessionTurnHandler {
    pub fn new(router: Arc<AnalysisRouter>, session: Arc<SessionContext>) -> Self {
        Self { router, session }
    }
}

#[async_trait]
impl TurnHandler for SessionTurnHandler {
    async fn handle(&self, utterance: &str) -> Reply {
        self.router.respond(&self.session, utterance).await
    }
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// How long a turn may run before the filler line is spoken.
    pub response_budget: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            response_budget: DEFAULT_RESPONSE_BUDGET,
        }
    }
}

pub struct VoiceSession {
    inbox: mpsc::Sender<String>,
    worker: JoinHandle<()>,
}

impl VoiceSession {
    pub fn spawn(
        handler: Arc<dyn TurnHandler>,
        sink: Arc<dyn SpeechSink>,
        config: VoiceConfig,
    ) -> Self {
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
        let worker = SessionWorker {
            handler,
            sink,
            config,
            rx,
            rx_open: true,
            queue: VecDeque::new(),
        };
        let worker = tokio::spawn(worker.run());
        Self { inbox, worker }
    }

    /// Hand a recognized utterance to the session.
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.inbox
            .send(text.into())
            .await
            .map_err(|_| AssistantError::SessionClosed)
    }

    /// Stop accepting utterances, finish queued ones, then stop the worker.
    pub async fn shutdown(self) {
        drop(self.inbox);
        if let Err(e) = self.worker.await {
            warn!("Voice worker ended abnormally: {}", e);
        }
    }
}

enum TurnOutcome {
    Finished,
    Cancelled,
    Redirected(String),
}

struct SessionWorker {
    handler: Arc<dyn TurnHandler>,
    sink: Arc<dyn SpeechSink>,
    config: VoiceConfig,
    rx: mpsc::Receiver<String>,
    rx_open: bool,
    queue: VecDeque<String>,
}

impl SessionWorker {
    async fn run(mut self) {
        info!("Voice session started");

        while let Some(utterance) = self.next_utterance().await {
            let mut pending = match detect_interruption(&utterance) {
                // Nothing is running, so a bare cancel only needs an ack
                Some(Interruption::Cancel) => {
                    self.queue.clear();
                    speak(self.sink.as_ref(), &Reply::new(ReplyKind::Cancelled, CANCELLED_TEXT)).await;
                    continue;
                }
                Some(Interruption::Redirect(rest)) => rest,
                None => utterance,
            };

            loop {
                match self.run_turn(pending).await {
                    TurnOutcome::Finished => break,
                    TurnOutcome::Cancelled => {
                        speak(self.sink.as_ref(), &Reply::new(ReplyKind::Cancelled, CANCELLED_TEXT)).await;
                        break;
                    }
                    TurnOutcome::Redirected(next) => pending = next,
                }
            }
        }

        info!("Voice session ended");
    }

    async fn next_utterance(&mut self) -> Option<String> {
        if let Some(queued) = self.queue.pop_front() {
            return Some(queued);
        }
        if !self.rx_open {
            return None;
        }
        let received = self.rx.recv().await;
        if received.is_none() {
            self.rx_open = false;
        }
        received
    }

    /// Run one turn while watching the inbox for interruptions.
    async fn run_turn(&mut self, utterance: String) -> TurnOutcome {
        debug!(utterance = %utterance, "Voice turn started");

        let handler = Arc::clone(&self.handler);
        let mut turn = tokio::spawn(async move { handler.handle(&utterance).await });
        let budget = tokio::time::sleep(self.config.response_budget);
        tokio::pin!(budget);
        let mut filler_spoken = false;

        loop {
            tokio::select! {
                joined = &mut turn => {
                    match joined {
                        Ok(reply) => speak(self.sink.as_ref(), &reply).await,
                        Err(e) => warn!("Voice turn failed: {}", e),
                    }
                    return TurnOutcome::Finished;
                }
                _ = &mut budget, if !filler_spoken => {
                    filler_spoken = true;
                    speak(self.sink.as_ref(), &Reply::new(ReplyKind::StillWorking, STILL_WORKING_TEXT)).await;
                }
                incoming = self.rx.recv(), if self.rx_open => {
                    let Some(text) = incoming else {
                        self.rx_open = false;
                        continue;
                    };
                    match detect_interruption(&text) {
                        Some(Interruption::Cancel) => {
                            info!("Voice turn cancelled");
                            turn.abort();
                            self.queue.clear();
                            return TurnOutcome::Cancelled;
                        }
                        Some(Interruption::Redirect(rest)) => {
                            info!("Voice turn redirected");
                            turn.abort();
                            self.queue.clear();
                            return TurnOutcome::Redirected(rest);
                        }
                        None => self.queue.push_back(text),
                    }
                }
            }
        }
    }
}

async fn speak(sink: &dyn SpeechSink, reply: &Reply) {
    if let Err(e) = sink.speak(reply).await {
        warn!(kind = %reply.kind, "Speech output failed: {}", e);
    }
}
