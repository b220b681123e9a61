//! The embedding side of the viewer: reacts to notifications and drives
//! next/previous navigation through the configured scenes.

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SceneSource;
use crate::events::{ExampleDirection, HostEvent, ViewerCommand};

/// Cyclic cursor over the configured scenes.
#[derive(Debug, Clone)]
pub struct ScenePlaylist {
    scenes: Vec<SceneSource>,
    current: usize,
}

impl ScenePlaylist {
    /// Starts at the scene whose image is `initial`, or at the first one.
    pub fn new(scenes: Vec<SceneSource>, initial: Option<&SceneSource>) -> Self {
        let current = initial
            .and_then(|s| scenes.iter().position(|c| c.image == s.image))
            .unwrap_or(0);
        Self { scenes, current }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn current(&self) -> Option<&SceneSource> {
        self.scenes.get(self.current)
    }

    pub fn step(&mut self, direction: ExampleDirection) -> Option<&SceneSource> {
        let n = self.scenes.len();
        if n == 0 {
            return None;
        }
        self.current = match direction {
            ExampleDirection::Next => (self.current + 1) % n,
            ExampleDirection::Previous => (self.current + n - 1) % n,
        };
        self.scenes.get(self.current)
    }
}

pub async fn run(
    mut events: Receiver<HostEvent>,
    to_viewer: Sender<ViewerCommand>,
    mut playlist: ScenePlaylist,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let event = select! {
            _ = cancel.cancelled() => break,
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
        };
        match event {
            HostEvent::ExampleChange(direction) => {
                let Some(scene) = playlist.step(direction).cloned() else {
                    info!(%direction, "no scenes configured; ignoring example change");
                    continue;
                };
                info!(%direction, image = %scene.image.display(), "switching example");
                let cmd = ViewerCommand::Load {
                    image: scene.image,
                    depth_map: scene.depth_map,
                };
                if to_viewer.send(cmd).await.is_err() {
                    break;
                }
            }
            HostEvent::ImmersiveEntered => info!("immersive mode entered"),
            HostEvent::ImmersiveEnterFailed(reason) => {
                warn!(%reason, "immersive mode unavailable")
            }
            HostEvent::ImmersiveExitComplete => info!("immersive mode exited"),
            HostEvent::LoadFailed { id, message } => {
                warn!(id, "scene failed to load: {message}")
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn scene(name: &str) -> SceneSource {
        SceneSource {
            image: PathBuf::from(format!("{name}.jpg")),
            depth_map: PathBuf::from(format!("{name}-depth.png")),
        }
    }

    #[test]
    fn playlist_wraps_both_ways() {
        let mut p = ScenePlaylist::new(vec![scene("a"), scene("b"), scene("c")], None);
        assert_eq!(p.step(ExampleDirection::Previous), Some(&scene("c")));
        assert_eq!(p.step(ExampleDirection::Next), Some(&scene("a")));
        assert_eq!(p.step(ExampleDirection::Next), Some(&scene("b")));
    }

    #[test]
    fn playlist_starts_at_initial_scene() {
        let p = ScenePlaylist::new(vec![scene("a"), scene("b")], Some(&scene("b")));
        assert_eq!(p.current(), Some(&scene("b")));
        assert!(ScenePlaylist::new(Vec::new(), None).current().is_none());
    }

    #[tokio::test]
    async fn example_change_loads_next_scene() {
        let (host_tx, host_rx) = mpsc::channel(4);
        let (viewer_tx, mut viewer_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let playlist = ScenePlaylist::new(vec![scene("a"), scene("b")], None);
        let task = tokio::spawn(run(host_rx, viewer_tx, playlist, cancel.clone()));

        host_tx
            .send(HostEvent::ExampleChange(ExampleDirection::Next))
            .await
            .unwrap();
        assert_eq!(
            viewer_rx.recv().await,
            Some(ViewerCommand::Load {
                image: PathBuf::from("b.jpg"),
                depth_map: PathBuf::from("b-depth.png"),
            })
        );
        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
