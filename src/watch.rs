use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher,
    event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
};
use tracing::{debug, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigEvent {
    Changed(PathBuf),
    Removed(PathBuf),
}

/// Watches the directory holding `config` and forwards events that concern
/// the file itself. Editors often replace files instead of writing in place,
/// so the parent directory is watched rather than the file.
pub fn start_config_watcher(
    config: &Path,
    tx: Sender<ConfigEvent>,
) -> NotifyResult<RecommendedWatcher> {
    let target = config.to_path_buf();
    let dir = match config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = target.file_name().map(|name| name.to_os_string());

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for forwarded in classify(event, file_name.as_deref()) {
                if tx.send(forwarded).is_err() {
                    debug!("config watcher receiver dropped");
                }
            }
        }
        Err(err) => warn!(error = %err, "config watch error"),
    })?;

    watcher.configure(Config::default())?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    debug!(dir = %dir.display(), file = %target.display(), "watching configuration");
    Ok(watcher)
}

fn classify(event: Event, file_name: Option<&std::ffi::OsStr>) -> Vec<ConfigEvent> {
    let ours = |p: &PathBuf| file_name.is_some_and(|name| p.file_name() == Some(name));
    let paths = event.paths.into_iter().filter(ours);
    match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(ConfigEvent::Changed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From))
        | EventKind::Remove(RemoveKind::File | RemoveKind::Any) => {
            paths.map(ConfigEvent::Removed).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::DataChange;
    use std::ffi::OsStr;

    #[test]
    fn only_the_config_file_is_forwarded() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/etc/editor/editor.yaml"))
            .add_path(PathBuf::from("/etc/editor/other.yaml"));
        assert_eq!(
            classify(event, Some(OsStr::new("editor.yaml"))),
            vec![ConfigEvent::Changed(PathBuf::from("/etc/editor/editor.yaml"))]
        );
    }

    #[test]
    fn renames_away_count_as_removal() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(PathBuf::from("editor.yaml"));
        assert_eq!(
            classify(event, Some(OsStr::new("editor.yaml"))),
            vec![ConfigEvent::Removed(PathBuf::from("editor.yaml"))]
        );
    }

    #[test]
    fn access_events_are_ignored() {
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("editor.yaml"));
        assert!(classify(event, Some(OsStr::new("editor.yaml"))).is_empty());
    }
}
