use std::sync::Arc;

use design_model::{DesignState, ShownImageDimensions};
use tokio::sync::watch;
use tracing::debug;

use crate::config::EditorConfig;
use crate::events::{Action, FeedbackMessage, PatchOrigin, StatePatch};
use crate::image_ref::ImageHandle;
use crate::platform::unload_guard::UnsavedMirror;
use crate::tabs::TabId;

#[derive(Debug, Clone, Default)]
pub struct EditorState {
    pub original_image: Option<ImageHandle>,
    pub design: DesignState,
    /// Outstanding bracketed operation sets.
    pub pending_loaders: usize,
    pub feedback: Option<FeedbackMessage>,
    pub have_not_saved_changes: bool,
    pub shown_image_dimensions: ShownImageDimensions,
    pub tab_id: Option<TabId>,
    pub shown_tabs_menu: bool,
    pub(crate) committed_ticket: u64,
}

/// What the presentation layer should render for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub show_main_content: bool,
    pub show_spinner: bool,
    pub show_topbar: bool,
    pub show_tools: bool,
}

impl EditorState {
    pub fn is_loading_globally(&self) -> bool {
        self.pending_loaders > 0
    }

    pub fn layout(&self, config: &EditorConfig) -> Layout {
        let persistent_feedback = self
            .feedback
            .as_ref()
            .is_some_and(FeedbackMessage::is_persistent);
        Layout {
            show_main_content: self.original_image.is_some() && !persistent_feedback,
            show_spinner: self.is_loading_globally(),
            show_topbar: !config.show_canvas_only,
            show_tools: !config.show_canvas_only,
        }
    }
}

/// Applies `action`; returns whether observers should be notified.
fn reduce(state: &mut EditorState, action: Action) -> bool {
    match action {
        Action::ShowLoader => {
            state.pending_loaders += 1;
            true
        }
        Action::HideLoader => {
            if state.pending_loaders == 0 {
                return false;
            }
            state.pending_loaders -= 1;
            true
        }
        Action::SetOriginalImage { image, ticket } => {
            if ticket < state.committed_ticket {
                debug!(
                    ticket,
                    committed = state.committed_ticket,
                    identity = %image.identity(),
                    "discarding stale image load"
                );
                return false;
            }
            state.committed_ticket = ticket;
            state.original_image = Some(image);
            true
        }
        Action::KeepOriginalImage { ticket } => {
            state.committed_ticket = state.committed_ticket.max(ticket);
            false
        }
        Action::SetFeedback(feedback) => {
            state.feedback = Some(feedback);
            true
        }
        Action::DismissFeedback => state.feedback.take().is_some(),
        Action::UpdateState { patch, origin } => {
            let design_changed = state.design.apply(patch.design);
            let before = state.have_not_saved_changes;
            match patch.have_not_saved_changes {
                Some(dirty) => state.have_not_saved_changes = dirty,
                None if origin == PatchOrigin::Host && design_changed => {
                    state.have_not_saved_changes = true
                }
                None => {}
            }
            design_changed || before != state.have_not_saved_changes
        }
        Action::SetShownImageDimensions(dimensions) => {
            if state.shown_image_dimensions == dimensions {
                return false;
            }
            state.shown_image_dimensions = dimensions;
            true
        }
        Action::SelectTab(tab) => {
            state.tab_id = Some(tab);
            state.shown_tabs_menu = false;
            true
        }
        Action::SetShownTabsMenu(opened) => {
            let changed = state.shown_tabs_menu != opened;
            state.shown_tabs_menu = opened;
            changed
        }
    }
}

/// Single owner of [`EditorState`]. Changes are published over a watch
/// channel; the unsaved flag is mirrored on every dispatch.
#[derive(Clone)]
pub struct Store {
    tx: Arc<watch::Sender<EditorState>>,
    unsaved: UnsavedMirror,
}

impl Store {
    pub fn new(initial: EditorState, unsaved: UnsavedMirror) -> Self {
        unsaved.set(initial.have_not_saved_changes);
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            unsaved,
        }
    }

    pub fn dispatch(&self, action: Action) -> bool {
        let unsaved = &self.unsaved;
        self.tx.send_if_modified(|state| {
            let changed = reduce(state, action);
            unsaved.set(state.have_not_saved_changes);
            changed
        })
    }

    /// Computes a patch from the current state and applies it atomically.
    pub fn update_with(
        &self,
        origin: PatchOrigin,
        f: impl FnOnce(&EditorState) -> StatePatch,
    ) -> bool {
        let unsaved = &self.unsaved;
        self.tx.send_if_modified(|state| {
            let patch = f(state);
            let changed = reduce(state, Action::UpdateState { patch, origin });
            unsaved.set(state.have_not_saved_changes);
            changed
        })
    }

    pub fn read<R>(&self, f: impl FnOnce(&EditorState) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> EditorState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EditorState> {
        self.tx.subscribe()
    }

    pub fn unsaved_mirror(&self) -> &UnsavedMirror {
        &self.unsaved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_ref::Bitmap;
    use design_model::{DesignPatch, Filter};

    fn store() -> Store {
        Store::new(EditorState::default(), UnsavedMirror::default())
    }

    fn handle(src: &str) -> ImageHandle {
        ImageHandle::ready(
            Some(src.to_string()),
            Bitmap {
                width: 2,
                height: 2,
                pixels: vec![0; 16],
            },
        )
    }

    #[test]
    fn loader_count_composes_overlapping_brackets() {
        let store = store();
        store.dispatch(Action::ShowLoader);
        store.dispatch(Action::ShowLoader);
        store.dispatch(Action::HideLoader);
        assert!(store.read(EditorState::is_loading_globally));
        store.dispatch(Action::HideLoader);
        assert!(!store.read(EditorState::is_loading_globally));
        assert!(!store.dispatch(Action::HideLoader));
        assert_eq!(store.read(|s| s.pending_loaders), 0);
    }

    #[test]
    fn older_tickets_do_not_overwrite_newer_commits() {
        let store = store();
        assert!(store.dispatch(Action::SetOriginalImage {
            image: handle("new.png"),
            ticket: 2,
        }));
        assert!(!store.dispatch(Action::SetOriginalImage {
            image: handle("old.png"),
            ticket: 1,
        }));
        let src = store.read(|s| s.original_image.as_ref().and_then(|i| i.src().map(str::to_string)));
        assert_eq!(src.as_deref(), Some("new.png"));
    }

    #[test]
    fn kept_image_outranks_loads_requested_before_it() {
        let store = store();
        store.dispatch(Action::SetOriginalImage {
            image: handle("img0.png"),
            ticket: 1,
        });
        store.dispatch(Action::KeepOriginalImage { ticket: 3 });
        assert!(!store.dispatch(Action::SetOriginalImage {
            image: handle("img1.png"),
            ticket: 2,
        }));
        store.dispatch(Action::KeepOriginalImage { ticket: 1 });
        assert_eq!(store.read(|s| s.committed_ticket), 3);
        assert!(store.dispatch(Action::SetOriginalImage {
            image: handle("img2.png"),
            ticket: 4,
        }));
    }

    #[test]
    fn host_edits_mark_unsaved_but_loadable_merges_do_not() {
        let store = store();
        let patch = StatePatch::from(DesignPatch {
            filter: Some(Some(Filter::Sepia)),
            ..DesignPatch::default()
        });
        store.dispatch(Action::UpdateState {
            patch: patch.clone(),
            origin: PatchOrigin::Loadable,
        });
        assert!(!store.unsaved_mirror().get());

        store.dispatch(Action::UpdateState {
            patch: StatePatch::from(DesignPatch {
                filter: Some(Some(Filter::Vintage)),
                ..DesignPatch::default()
            }),
            origin: PatchOrigin::Host,
        });
        assert!(store.read(|s| s.have_not_saved_changes));
        assert!(store.unsaved_mirror().get());

        store.dispatch(Action::UpdateState {
            patch: StatePatch {
                have_not_saved_changes: Some(false),
                ..StatePatch::default()
            },
            origin: PatchOrigin::Host,
        });
        assert!(!store.unsaved_mirror().get());
    }

    #[test]
    fn persistent_feedback_hides_main_content() {
        let store = store();
        let config = EditorConfig::default();
        store.dispatch(Action::SetOriginalImage {
            image: handle("a.png"),
            ticket: 1,
        });
        assert!(store.read(|s| s.layout(&config)).show_main_content);
        store.dispatch(Action::SetFeedback(FeedbackMessage::persistent("boom")));
        assert!(!store.read(|s| s.layout(&config)).show_main_content);
        store.dispatch(Action::DismissFeedback);
        assert!(store.read(|s| s.layout(&config)).show_main_content);
    }

    #[test]
    fn selecting_a_tab_closes_the_drawer() {
        let store = store();
        store.dispatch(Action::SetShownTabsMenu(true));
        store.dispatch(Action::SelectTab(TabId::Resize));
        let (tab, menu) = store.read(|s| (s.tab_id, s.shown_tabs_menu));
        assert_eq!(tab, Some(TabId::Resize));
        assert!(!menu);
    }
}
