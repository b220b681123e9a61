//! Line-oriented control channel: one command per line on stdin.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DisplayMode;
use crate::events::{ExampleDirection, HostEvent, ViewerCommand};

/// Where a parsed line should go.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Viewer(ViewerCommand),
    Host(HostEvent),
    Quit,
}

fn parse_f32(arg: Option<&str>, what: &str) -> Result<f32> {
    let raw = arg.ok_or_else(|| anyhow!("{what} needs a value"))?;
    let v: f32 = raw
        .parse()
        .with_context(|| format!("invalid {what} value {raw:?}"))?;
    if !v.is_finite() {
        bail!("{what} must be finite");
    }
    Ok(v)
}

fn parse_u32(arg: Option<&str>, what: &str) -> Result<u32> {
    let raw = arg.ok_or_else(|| anyhow!("{what} needs a value"))?;
    raw.parse()
        .with_context(|| format!("invalid {what} value {raw:?}"))
}

/// Parses one control line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Control>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let control = match verb {
        "mode" => {
            let raw = arg.ok_or_else(|| anyhow!("mode needs one of {:?}", DisplayMode::NAMES))?;
            Control::Viewer(ViewerCommand::SetDisplayMode(DisplayMode::parse_lenient(raw)))
        }
        "focus" => Control::Viewer(ViewerCommand::SetFocus(parse_f32(arg, "focus")?)),
        "offset" => Control::Viewer(ViewerCommand::SetMouseXOffset(parse_f32(arg, "offset")?)),
        "ratio" => match arg {
            Some("auto") => Control::Viewer(ViewerCommand::SetPixelRatio(None)),
            _ => {
                let ratio = parse_f32(arg, "ratio")?;
                if ratio <= 0.0 {
                    bail!("ratio must be positive");
                }
                Control::Viewer(ViewerCommand::SetPixelRatio(Some(ratio)))
            }
        },
        "expand" => Control::Viewer(ViewerCommand::SetExpandRadius(parse_u32(arg, "expand")?)),
        "resolution" => {
            Control::Viewer(ViewerCommand::SetMeshResolution(parse_u32(arg, "resolution")?))
        }
        "idle" => match arg {
            Some("on") => Control::Viewer(ViewerCommand::SetIdleMovement(true)),
            Some("off") => Control::Viewer(ViewerCommand::SetIdleMovement(false)),
            other => bail!("idle expects on|off, got {other:?}"),
        },
        "idle-after" => {
            let raw = arg.ok_or_else(|| anyhow!("idle-after needs a duration"))?;
            let after = humantime::parse_duration(raw)
                .with_context(|| format!("invalid duration {raw:?}"))?;
            Control::Viewer(ViewerCommand::SetIdleMovementAfter(after))
        }
        "load" => {
            let image = arg.ok_or_else(|| anyhow!("load needs IMAGE DEPTH_MAP"))?;
            let depth = words
                .next()
                .ok_or_else(|| anyhow!("load needs IMAGE DEPTH_MAP"))?;
            Control::Viewer(ViewerCommand::Load {
                image: PathBuf::from(image),
                depth_map: PathBuf::from(depth),
            })
        }
        "reload" => Control::Viewer(ViewerCommand::Reload),
        "next" => Control::Host(HostEvent::ExampleChange(ExampleDirection::Next)),
        "previous" | "prev" => Control::Host(HostEvent::ExampleChange(ExampleDirection::Previous)),
        "vr" => match arg {
            Some("enter") => Control::Viewer(ViewerCommand::EnterImmersive),
            Some("exit") => Control::Viewer(ViewerCommand::ExitImmersive),
            Some("distance") => Control::Viewer(ViewerCommand::SetImmersiveDistance(parse_f32(
                words.next(),
                "distance",
            )?)),
            Some("adjust") => Control::Viewer(ViewerCommand::AdjustImmersiveDistance(parse_f32(
                words.next(),
                "adjust",
            )?)),
            other => bail!("vr expects enter|exit|distance|adjust, got {other:?}"),
        },
        "quit" | "exit" => Control::Quit,
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(control))
}

/// Reads stdin on a dedicated thread. A blocking read cannot be cancelled,
/// so it must not live on the runtime's blocking pool. The channel closes
/// on EOF.
pub fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("stdin read failed: {err}");
                    break;
                }
            }
        }
    });
    rx
}

/// Handles control lines until their source closes or cancellation. `quit`
/// cancels the whole application, and so does EOF when `shutdown_on_eof`
/// is set.
pub async fn run(
    mut lines: Receiver<String>,
    to_viewer: Sender<ViewerCommand>,
    to_host: Sender<HostEvent>,
    cancel: CancellationToken,
    shutdown_on_eof: bool,
) -> Result<()> {
    loop {
        let line = select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            if shutdown_on_eof {
                info!("control input closed; initiating shutdown");
                cancel.cancel();
            } else {
                debug!("control input closed");
            }
            break;
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Control::Viewer(cmd))) => {
                debug!(?cmd, "control command");
                if to_viewer.send(cmd).await.is_err() {
                    break;
                }
            }
            Ok(Some(Control::Host(event))) => {
                if to_host.send(event).await.is_err() {
                    break;
                }
            }
            Ok(Some(Control::Quit)) => {
                info!("quit requested");
                cancel.cancel();
                break;
            }
            Err(err) => warn!("ignoring control line {line:?}: {err:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn viewer(line: &str) -> ViewerCommand {
        match parse_line(line).unwrap() {
            Some(Control::Viewer(cmd)) => cmd,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_settings() {
        assert_eq!(
            viewer("mode anaglyph"),
            ViewerCommand::SetDisplayMode(DisplayMode::Anaglyph)
        );
        assert_eq!(
            viewer("mode sideways"),
            ViewerCommand::SetDisplayMode(DisplayMode::Full)
        );
        assert_eq!(viewer("focus 0.6"), ViewerCommand::SetFocus(0.6));
        assert_eq!(viewer("ratio auto"), ViewerCommand::SetPixelRatio(None));
        assert_eq!(viewer("ratio 1.5"), ViewerCommand::SetPixelRatio(Some(1.5)));
        assert_eq!(viewer("expand 3"), ViewerCommand::SetExpandRadius(3));
        assert_eq!(viewer("idle off"), ViewerCommand::SetIdleMovement(false));
        assert_eq!(
            viewer("idle-after 5s"),
            ViewerCommand::SetIdleMovementAfter(Duration::from_secs(5))
        );
        assert_eq!(
            viewer("  vr distance 4  "),
            ViewerCommand::SetImmersiveDistance(4.0)
        );
    }

    #[test]
    fn parses_load_and_navigation() {
        assert_eq!(
            viewer("load a.jpg a-depth.png"),
            ViewerCommand::Load {
                image: PathBuf::from("a.jpg"),
                depth_map: PathBuf::from("a-depth.png"),
            }
        );
        assert_eq!(
            parse_line("next").unwrap(),
            Some(Control::Host(HostEvent::ExampleChange(ExampleDirection::Next)))
        );
        assert_eq!(parse_line("quit").unwrap(), Some(Control::Quit));
        assert_eq!(parse_line("# comment").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("focus").is_err());
        assert!(parse_line("focus abc").is_err());
        assert!(parse_line("ratio -1").is_err());
        assert!(parse_line("load only-one").is_err());
        assert!(parse_line("vr sideways").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[tokio::test]
    async fn forwards_lines_and_cancels_on_eof() {
        let (line_tx, line_rx) = mpsc::channel(8);
        for line in ["focus 0.5", "bogus", "next"] {
            line_tx.send(line.to_string()).await.unwrap();
        }
        drop(line_tx);
        let (viewer_tx, mut viewer_rx) = mpsc::channel(8);
        let (host_tx, mut host_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        run(line_rx, viewer_tx, host_tx, cancel.clone(), true)
            .await
            .unwrap();
        assert_eq!(viewer_rx.recv().await, Some(ViewerCommand::SetFocus(0.5)));
        assert_eq!(
            host_rx.recv().await,
            Some(HostEvent::ExampleChange(ExampleDirection::Next))
        );
        assert!(cancel.is_cancelled());
    }
}
