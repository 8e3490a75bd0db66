// Texture hot-reload
//
// Watches the texture directory and queues the names of PNG files that were
// created or modified. The render loop drains the queue once per tick and
// reloads those textures on its own thread.

use anyhow::{Context, Result};
use notify::{event::EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

pub struct TextureWatcher {
    // Dropping the watcher stops the notification thread
    _watcher: RecommendedWatcher,
    changed: Arc<Mutex<Vec<String>>>,
}

impl TextureWatcher {
    pub fn new(texture_dir: &Path) -> Result<Self> {
        let changed = Arc::new(Mutex::new(Vec::new()));
        let queue = changed.clone();

        let mut watcher = notify::recommended_watcher(
            move |result: notify::Result<notify::Event>| match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        return;
                    }
                    let mut queue = queue.lock();
                    for name in event.paths.iter().filter_map(|path| texture_name_from_path(path)) {
                        if !queue.contains(&name) {
                            log::debug!("Texture '{}' changed on disk", name);
                            queue.push(name);
                        }
                    }
                }
                Err(e) => log::warn!("Texture watcher error: {}", e),
            },
        )
        .context("Failed to create texture watcher")?;

        watcher
            .watch(texture_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch texture directory {:?}", texture_dir))?;
        log::info!("Watching {:?} for texture changes", texture_dir);

        Ok(Self {
            _watcher: watcher,
            changed,
        })
    }

    /// Names of textures changed since the last call, in the order first seen.
    pub fn drain_changes(&self) -> Vec<String> {
        std::mem::take(&mut *self.changed.lock())
    }
}

/// `textures/paving.png` -> `paving`. Anything that is not a PNG is ignored.
pub fn texture_name_from_path(path: &Path) -> Option<String> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case("png") {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_paths_map_to_texture_names() {
        assert_eq!(
            texture_name_from_path(Path::new("assets/textures/paving2.png")),
            Some("paving2".to_string())
        );
        assert_eq!(
            texture_name_from_path(Path::new("COBBLESTONE.PNG")),
            Some("COBBLESTONE".to_string())
        );
    }

    #[test]
    fn other_files_are_ignored() {
        assert_eq!(texture_name_from_path(Path::new("assets/textures/notes.txt")), None);
        assert_eq!(texture_name_from_path(Path::new("assets/textures/paving.png~")), None);
        assert_eq!(texture_name_from_path(Path::new("assets/textures")), None);
    }
}
