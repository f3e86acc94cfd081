use std::sync::Arc;

use anyhow::Result;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use super::error::AgentError;
use super::ingest::IngestLoop;
use super::{Agent, AgentInner, ParticipantWait};
use crate::edge::CallRef;
use crate::events::{AgentNotice, AgentPhase};
use crate::plugins::Component;

#[derive(Debug, Clone, Copy)]
enum Hook {
    Start,
    Stop,
    Close,
}

impl Hook {
    fn as_str(self) -> &'static str {
        match self {
            Hook::Start => "start",
            Hook::Stop => "stop",
            Hook::Close => "close",
        }
    }
}

async fn run_hook<C: Component + ?Sized>(component: &C, hook: Hook) -> Result<()> {
    match hook {
        Hook::Start => component.start().await,
        Hook::Stop => component.stop().await,
        Hook::Close => component.close().await,
    }
}

async fn run_hook_logged<C: Component + ?Sized>(component: &C, hook: Hook) {
    if let Err(err) = run_hook(component, hook).await {
        warn!(
            target: "agent",
            component = component.name(),
            hook = hook.as_str(),
            %err,
            "component hook failed"
        );
    }
}

/// Closes the agent in the background unless disarmed first.
struct CloseOnDrop(Option<Agent>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(agent) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { agent.close().await });
            }
            Err(_) => warn!(target: "agent", "no runtime left to close the agent"),
        }
    }
}

/// Marks the agent closed even if teardown panics.
struct MarkClosed(Arc<AgentInner>);

impl Drop for MarkClosed {
    fn drop(&mut self) {
        self.0.closed_tx.send_replace(true);
    }
}

impl Agent {
    /// Joins `call`. Fails fast while another join is running and after a
    /// join succeeded. Any failure closes the agent; if the agent was
    /// already closing the failure is not reported.
    pub async fn join(&self, call: &CallRef) -> Result<(), AgentError> {
        let Ok(_join_guard) = self.inner.join_lock.try_lock() else {
            return Err(AgentError::JoinInProgress);
        };

        let span = info_span!(
            target: "agent",
            "agent_call",
            agent_id = %self.inner.id,
            call_id = %call.id
        );
        {
            let mut state = self.inner.session.lock();
            if state.close_started {
                return Err(AgentError::Closed);
            }
            if state.joined_at.is_some() {
                return Err(AgentError::AlreadyJoined);
            }
            state.call = Some(call.clone());
            state.span = Some(span.clone());
        }

        let ended = self.inner.ended.clone();
        let result = async {
            tokio::select! {
                biased;
                _ = ended.cancelled() => Err(AgentError::Closed),
                result = self.inner.join_steps(call) => result,
            }
        }
        .instrument(span.clone())
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.inner.session.lock().close_started {
                    span.in_scope(|| {
                        debug!(target: "agent", %err, "join interrupted by close");
                    });
                    return Ok(());
                }
                // The call ended before close got going.
                if self.inner.ended.is_cancelled() {
                    span.in_scope(|| {
                        debug!(target: "agent", %err, "join interrupted by call end");
                    });
                    self.close().await;
                    return Ok(());
                }
                span.in_scope(|| warn!(target: "agent", %err, "join failed, closing agent"));
                self.close().await;
                Err(err)
            }
        }
    }

    /// Closes the agent. Every caller waits for the same teardown, which runs
    /// to completion in the background even if a caller gives up.
    pub async fn close(&self) {
        let mut closed = self.inner.closed_tx.subscribe();

        let span = {
            let mut state = self.inner.session.lock();
            if state.close_started {
                None
            } else {
                state.close_started = true;
                Some(state.span.clone().unwrap_or_else(tracing::Span::none))
            }
        };

        if let Some(span) = span {
            let guard = MarkClosed(Arc::clone(&self.inner));
            tokio::spawn(
                async move {
                    guard.0.teardown().await;
                    drop(guard);
                }
                .instrument(span),
            );
        }

        // The sender lives as long as `self`, so this only returns once closed.
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Waits for the call to end, then closes the agent. Dropping the future
    /// early still closes the agent, in the background.
    pub async fn finish(&self) {
        {
            let state = self.inner.session.lock();
            if state.joined_at.is_none() || state.close_started {
                return;
            }
        }

        let guard = CloseOnDrop(Some(self.clone()));
        self.inner.ended.cancelled().await;
        guard.disarm();
        self.close().await;
    }
}

impl AgentInner {
    async fn join_steps(self: &Arc<Self>, call: &CallRef) -> Result<(), AgentError> {
        info!(target: "agent", call_type = %call.call_type, "joining call");
        self.notify(AgentNotice::lifecycle(&self.id, AgentPhase::Joining));

        if let Some(dispatcher) = self.spawn_dispatcher() {
            self.session.lock().dispatcher = Some(dispatcher);
        }

        self.start_components()
            .await
            .map_err(AgentError::join("start"))?;

        self.edge
            .create_user(&self.agent_user)
            .await
            .map_err(AgentError::join("create_user"))?;

        for server in &self.tool_servers {
            server
                .connect()
                .await
                .map_err(AgentError::join("tool_server"))?;
        }

        if let Some(realtime) = &self.caps.realtime {
            realtime
                .connect()
                .await
                .map_err(AgentError::join("model_connect"))?;
        }

        let connection = self
            .edge
            .join(&self.agent_user, call)
            .await
            .map_err(AgentError::join("transport"))?;
        self.session.lock().connection = Some(connection.clone());

        self.publish_media().await?;

        let conversation = self
            .edge
            .create_conversation(call, &self.agent_user, &self.instructions)
            .await
            .map_err(AgentError::join("conversation"))?;
        self.session.lock().conversation = Some(conversation.clone());

        let wait = match self.config.participant_wait {
            ParticipantWait::Skip => None,
            ParticipantWait::Timeout(limit) => Some(Some(limit)),
            ParticipantWait::Forever => Some(None),
        };
        if let Some(limit) = wait {
            match connection.wait_for_participant(limit).await {
                Ok(true) => debug!(target: "agent", "participant present"),
                Ok(false) => info!(
                    target: "agent",
                    ?limit,
                    "no participant joined in time, continuing"
                ),
                Err(err) => warn!(target: "agent", %err, "waiting for participant failed"),
            }
        }

        let ingest = IngestLoop {
            audio: self.audio.clone(),
            agent_user: self.agent_user.clone(),
            processors: self.processors.audio.clone(),
            model: self.caps.audio.clone(),
            stt: self.stt.clone(),
            turn_detection: self.turn_detection.clone(),
            conversation: Some(conversation),
            interval: self.config.ingest_interval,
            drain_timeout: self.config.drain_timeout,
        };
        let handle = tokio::spawn(ingest.run(self.ended.clone()).in_current_span());

        {
            let mut state = self.session.lock();
            state.ingest = Some(handle);
            state.joined_at = Some(Instant::now());
        }
        self.notify(AgentNotice::lifecycle(&self.id, AgentPhase::Joined));
        info!(target: "agent", "agent joined call");
        Ok(())
    }

    /// Creates the outbound audio track when anything will speak, and
    /// publishes it together with the first publisher's video.
    async fn publish_media(&self) -> Result<(), AgentError> {
        let needs_audio = self.tts.is_some()
            || self.caps.consumes_audio()
            || !self.processors.audio_publishers.is_empty();

        let audio_track = if needs_audio {
            let track = self
                .edge
                .create_audio_track(self.config.output_sample_rate, self.config.output_channels)
                .await
                .map_err(AgentError::join("audio_track"))?;
            self.session.lock().audio_track = Some(track.clone());
            self.barge_in.set_output_track(track.clone());
            for publisher in &self.processors.audio_publishers {
                publisher
                    .publish_audio_track(track.clone())
                    .await
                    .map_err(AgentError::join("audio_publisher"))?;
            }
            Some(track)
        } else {
            None
        };

        let video = match self.processors.video_publishers.first() {
            Some(publisher) => {
                let track = publisher
                    .publish_video_track()
                    .await
                    .map_err(AgentError::join("video_publisher"))?;
                Some((publisher.name().to_string(), track))
            }
            None => None,
        };

        if audio_track.is_some() || video.is_some() {
            self.edge
                .publish_tracks(audio_track, video.as_ref().map(|(_, track)| track.clone()))
                .await
                .map_err(AgentError::join("publish"))?;
        }

        if let Some((processor, track)) = video {
            self.add_published_track(processor, track).await;
        }
        Ok(())
    }

    async fn start_components(&self) -> Result<()> {
        run_hook(self.llm.as_ref(), Hook::Start).await?;
        if let Some(stt) = &self.stt {
            run_hook(stt.as_ref(), Hook::Start).await?;
        }
        if let Some(tts) = &self.tts {
            run_hook(tts.as_ref(), Hook::Start).await?;
        }
        if let Some(detector) = &self.turn_detection {
            run_hook(detector.as_ref(), Hook::Start).await?;
        }
        for processor in &self.processors.all {
            run_hook(processor.as_ref(), Hook::Start).await?;
        }
        for server in &self.tool_servers {
            run_hook(server.as_ref(), Hook::Start).await?;
        }
        Ok(())
    }

    async fn apply_logged(&self, hook: Hook) {
        run_hook_logged(self.llm.as_ref(), hook).await;
        if let Some(stt) = &self.stt {
            run_hook_logged(stt.as_ref(), hook).await;
        }
        if let Some(tts) = &self.tts {
            run_hook_logged(tts.as_ref(), hook).await;
        }
        if let Some(detector) = &self.turn_detection {
            run_hook_logged(detector.as_ref(), hook).await;
        }
        for processor in &self.processors.all {
            run_hook_logged(processor.as_ref(), hook).await;
        }
        for server in &self.tool_servers {
            run_hook_logged(server.as_ref(), hook).await;
        }
    }

    async fn teardown(&self) {
        info!(target: "agent", "closing agent");
        self.notify(AgentNotice::lifecycle(&self.id, AgentPhase::Closing));
        self.ended.cancel();

        let (ingest, dispatcher) = {
            let mut state = self.session.lock();
            (state.ingest.take(), state.dispatcher.take())
        };
        if let Some(ingest) = ingest {
            if let Err(err) = ingest.await {
                warn!(target: "agent", %err, "audio ingestion task failed");
            }
        }
        if let Some(mut dispatcher) = dispatcher {
            if timeout(self.config.drain_timeout, &mut dispatcher)
                .await
                .is_err()
            {
                warn!(target: "agent", "event dispatcher did not stop in time, aborting");
                dispatcher.abort();
            }
        }

        self.turns.lock().await.shutdown();

        self.apply_logged(Hook::Stop).await;
        self.apply_logged(Hook::Close).await;

        for server in &self.tool_servers {
            if let Err(err) = server.disconnect().await {
                warn!(target: "agent", server = server.name(), %err, "tool server disconnect failed");
            }
        }

        self.stop_video().await;

        let (connection, audio_track) = {
            let mut state = self.session.lock();
            state.conversation = None;
            (state.connection.take(), state.audio_track.take())
        };
        if let Some(connection) = connection {
            if let Err(err) = connection.close().await {
                warn!(target: "agent", %err, "failed to close call connection");
            }
        }
        if let Some(track) = audio_track {
            if let Err(err) = track.stop().await {
                warn!(target: "agent", %err, "failed to stop outbound audio track");
            }
        }

        self.audio.clear();
        self.transcripts.clear();
        self.session.lock().span = None;

        self.notify(AgentNotice::lifecycle(&self.id, AgentPhase::Closed));
        info!(target: "agent", "agent closed");
    }
}
