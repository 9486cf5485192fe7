use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::{self, Write};
use std::path::Path;

use browser_llm::app::runner::{pump_until, WorkerEvents};
use browser_llm::format::human_duration;
use browser_llm::template;
use browser_llm::{
    spawn_worker, ChannelWorker, Config, LoggingHandler, Outbox, ParaphraseStyle, RunState,
    ScriptedBackend, Session, SessionError, SessionEvent, WorkerEvent,
};

use crate::progress::{DownloadBars, Progress};

/// Runs a full session against the scripted worker: probe, load, then each
/// prompt in turn.
pub async fn simulate(
    config: Config,
    prompts: Vec<String>,
    paraphrase: Option<(String, ParaphraseStyle)>,
    unsupported: bool,
) -> Result<()> {
    let mut backend = ScriptedBackend::new(config.clone());
    if unsupported {
        backend = backend.unsupported();
    }
    let (worker, mut events) = spawn_worker(backend);

    let mut session: Session<ChannelWorker> = Session::new(&config);
    session.events().subscribe(LoggingHandler);
    for kind in ["text_delta", "paraphrase_delta"] {
        session.events().subscribe_to(
            kind,
            Box::new(|event: &SessionEvent| {
                if let Err(e) = write_delta(&mut io::stdout(), event) {
                    tracing::debug!(error = %e, "writing streamed text failed");
                }
            }),
        );
    }

    session.attach(worker)?;
    let mut spinner = Progress::new();
    spinner.spinner("Running feature checks...");
    pump_until(&mut session, &mut events, |s| {
        s.state() != RunState::Checking || s.error().is_some()
    })
    .await?;
    spinner.stop_and_clear();
    if let Some(error) = session.error() {
        return Err(SessionError::ProbeFailed(error.to_string()).into());
    }

    session.load()?;
    load_with_progress(&mut session, &mut events).await?;

    for prompt in prompts {
        println!(">>> {}", prompt);
        session.submit_message(prompt, None)?;
        pump_until(&mut session, &mut events, |s| !s.is_running()).await?;
        println!();
        if let Some(error) = session.error() {
            eprintln!("Error: {}", error);
            continue;
        }
        if let Some(image) = session.messages().last().and_then(|m| m.image.as_deref()) {
            println!("[image: {} chars]", image.len());
        }
        println!("{}", session.status());
    }

    if let Some((text, style)) = paraphrase {
        println!(">>> paraphrase ({:?}): {}", style, text);
        session.paraphrase_text(text, style)?;
        pump_until(&mut session, &mut events, |s| !s.paraphrase().running).await?;
        println!();
    }

    session.dispose();
    Ok(())
}

/// Writes streamed text as it arrives; other events are ignored.
fn write_delta<W: Write>(out: &mut W, event: &SessionEvent) -> io::Result<()> {
    match event {
        SessionEvent::TextDelta { delta } | SessionEvent::ParaphraseDelta { delta } => {
            out.write_all(delta.as_bytes())?;
            out.flush()
        }
        _ => Ok(()),
    }
}

async fn load_with_progress(session: &mut Session<ChannelWorker>, events: &mut WorkerEvents) -> Result<()> {
    let started = std::time::Instant::now();
    let mut spinner = Progress::new();
    let mut bars = DownloadBars::new();

    while session.state() != RunState::Ready {
        let event = events.recv().await.context("worker exited while loading")?;
        session.handle_event(event)?;
        if let Some(error) = session.error() {
            bars.clear();
            spinner.stop_and_clear();
            return Err(SessionError::LoadFailed(error.to_string()).into());
        }
        if !session.loading_message().is_empty() {
            spinner.spinner(session.loading_message());
        }
        bars.sync(session.progress());
    }

    bars.clear();
    spinner.stop_and_clear();
    eprintln!("Model ready in {}", human_duration(started.elapsed().as_secs_f64()));
    Ok(())
}

/// One line of a replay file: either a user submission or a raw worker event.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayStep {
    User {
        user: String,
        #[serde(default)]
        image: Option<String>,
    },
    Event(serde_json::Value),
}

/// Feeds a JSON-lines log through a session and prints where it ends up.
pub fn replay(config: Config, path: &Path, show_commands: bool) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading replay file {}", path.display()))?;

    let mut session: Session<Outbox> = Session::new(&config);
    session.events().subscribe(LoggingHandler);
    session.attach(Outbox::new())?;

    let mut dropped = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ReplayStep = serde_json::from_str(line)
            .with_context(|| format!("line {}: not JSON", lineno + 1))?;
        match step {
            ReplayStep::User { user, image } => {
                session
                    .submit_message(user, image)
                    .with_context(|| format!("line {}: submit rejected", lineno + 1))?;
            }
            ReplayStep::Event(value) => match WorkerEvent::from_value(value) {
                Ok(event) => session
                    .handle_event(event)
                    .with_context(|| format!("line {}", lineno + 1))?,
                Err(e) => {
                    tracing::warn!(line = lineno + 1, error = %e, "skipping event");
                    dropped += 1;
                }
            },
        }
        if show_commands {
            if let Some(outbox) = session.worker_mut() {
                for command in outbox.drain() {
                    println!("-> {}", command.to_json()?);
                }
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    let status = session.status();
    if !status.is_idle() {
        println!("{}", status);
    }
    if dropped > 0 {
        eprintln!("{} malformed event(s) skipped", dropped);
    }
    Ok(())
}

/// Prints the prompt a paraphrase request would send to the model.
pub fn prompt(text: &str, style: ParaphraseStyle) -> Result<()> {
    let messages = template::paraphrase_messages(style, text)?;
    print!("{}", template::render_chatml(&messages, true));
    Ok(())
}

pub fn version() -> Result<()> {
    println!("browser-llm version {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_write_delta_streams_text_only() {
        let mut out = Vec::new();
        write_delta(&mut out, &SessionEvent::TextDelta { delta: "Hi".to_string() }).unwrap();
        write_delta(&mut out, &SessionEvent::TranscriptChanged { len: 2 }).unwrap();
        write_delta(&mut out, &SessionEvent::ParaphraseDelta { delta: " there".to_string() }).unwrap();
        assert_eq!(out, b"Hi there");
    }

    #[test]
    fn test_write_delta_reports_io_errors() {
        let err = write_delta(&mut BrokenPipe, &SessionEvent::TextDelta { delta: "x".to_string() })
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
