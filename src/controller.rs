use std::sync::{Arc, Weak};

use anyhow::Context;
use design_model::{DesignStateSnapshot, ShownImageDimensions};
use futures::FutureExt;
use futures::future;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bridge::{
    self, CurrentImageData, CurrentImgDataFn, HostSlot, StateUpdate, UpdateStateFn,
};
use crate::config::EditorConfig;
use crate::error::LoadError;
use crate::events::{Action, FeedbackMessage, PatchOrigin, ViewportSize};
use crate::image_ref::{Candidate, ImageHandle, ImageIdentity, ImageRef, same_image};
use crate::platform::unload_guard::{UnloadSignal, UnloadVeto, UnsavedMirror};
use crate::store::{EditorState, Layout, Store};
use crate::tabs::{self, Tab, TabId};
use crate::tasks::busy::{Bracketer, Operation};
use crate::tasks::cloud_query::CloudQueryResolver;
use crate::tasks::load_guard::{Decision, LoadGuard, LoadTicket};
use crate::tasks::loader::{FetchRequest, ImageFetcher, Loader};
use crate::tasks::viewport::ViewportObserver;
use crate::translator::{TranslationBackend, Translator};

/// Collaborators supplied by the host at mount time.
pub struct MountOptions {
    fetcher: Arc<dyn ImageFetcher>,
    update_state_slot: Option<Arc<dyn HostSlot<UpdateStateFn>>>,
    current_img_data_slot: Option<Arc<dyn HostSlot<CurrentImgDataFn>>>,
    unload_signal: Option<Arc<dyn UnloadSignal>>,
    translation_backend: Option<Arc<dyn TranslationBackend>>,
    container_size: Option<watch::Receiver<ViewportSize>>,
}

impl MountOptions {
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher,
            update_state_slot: None,
            current_img_data_slot: None,
            unload_signal: None,
            translation_backend: None,
            container_size: None,
        }
    }

    pub fn update_state_slot(mut self, slot: Arc<dyn HostSlot<UpdateStateFn>>) -> Self {
        self.update_state_slot = Some(slot);
        self
    }

    pub fn current_img_data_slot(mut self, slot: Arc<dyn HostSlot<CurrentImgDataFn>>) -> Self {
        self.current_img_data_slot = Some(slot);
        self
    }

    pub fn unload_signal(mut self, signal: Arc<dyn UnloadSignal>) -> Self {
        self.unload_signal = Some(signal);
        self
    }

    pub fn translation_backend(mut self, backend: Arc<dyn TranslationBackend>) -> Self {
        self.translation_backend = Some(backend);
        self
    }

    /// Container box sizes reported by the host, observed while
    /// `observe-plugin-container-size` is on.
    pub fn container_size(mut self, sizes: watch::Receiver<ViewportSize>) -> Self {
        self.container_size = Some(sizes);
        self
    }
}

/// Orchestrates image loads and state synchronisation for one mounted editor.
#[derive(Clone)]
pub struct EditorController {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<EditorConfig>,
    store: Store,
    loader: Loader,
    guard: LoadGuard,
    bracketer: Bracketer,
    cloud_query: CloudQueryResolver,
    viewport: ViewportObserver,
    container_size: Option<watch::Receiver<ViewportSize>>,
    translator: Translator,
    translation_backend: Option<Arc<dyn TranslationBackend>>,
    unload_signal: Option<Arc<dyn UnloadSignal>>,
    unload_veto: Mutex<Option<UnloadVeto>>,
    update_state_slot: Option<Arc<dyn HostSlot<UpdateStateFn>>>,
    current_img_data_slot: Option<Arc<dyn HostSlot<CurrentImgDataFn>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl EditorController {
    /// Mounts the editor and starts the initial load. Must be called inside a
    /// Tokio runtime.
    pub fn mount(config: EditorConfig, options: MountOptions) -> Self {
        let translator = Translator::new(&config.translations);
        let initial_tab = config
            .default_tab_id
            .or_else(|| {
                tabs::chosen_tabs(&config.tabs_ids, config.use_cloudimage)
                    .first()
                    .map(|tab| tab.id)
            });
        let store = Store::new(
            EditorState {
                tab_id: initial_tab,
                ..EditorState::default()
            },
            UnsavedMirror::default(),
        );
        let inner = Arc::new(Inner {
            loader: Loader::new(options.fetcher, translator.clone()),
            guard: LoadGuard::new(),
            bracketer: Bracketer::new(store.clone()),
            cloud_query: CloudQueryResolver::new(),
            viewport: ViewportObserver::new(),
            container_size: options.container_size,
            translator,
            translation_backend: options.translation_backend,
            unload_signal: options.unload_signal,
            unload_veto: Mutex::new(None),
            update_state_slot: options.update_state_slot,
            current_img_data_slot: options.current_img_data_slot,
            tasks: Mutex::new(JoinSet::new()),
            store,
            config: RwLock::new(config),
        });

        inner.assign_host_slots();
        inner.sync_unload_veto();
        inner.sync_viewport();

        let (candidate, snapshot, fetch_translations) = {
            let config = inner.config.read();
            (
                config.initial_candidate(),
                config.loadable_design_state.clone(),
                config.use_backend_translations,
            )
        };
        info!(candidate = ?candidate.as_ref().and_then(|c| c.identity()), "mounting editor");
        let run = inner.bracketer.run(|| {
            let load = inner.load_original(candidate);
            let load = match snapshot {
                Some(snapshot) => inner.then_merge(load, snapshot),
                None => load,
            };
            let mut operations = vec![load];
            if fetch_translations {
                operations.push(inner.fetch_translations());
            }
            operations
        });
        inner.spawn(run);

        Self { inner }
    }

    /// Host changed the `source` option.
    pub fn set_source(&self, source: Option<Candidate>) {
        self.inner.config.write().source = source.clone();
        let Some(candidate) = source.filter(|candidate| !candidate.is_blank()) else {
            return;
        };
        if self.inner.is_active(&candidate) {
            debug!("source already active");
            self.inner.keep_active();
            return;
        }
        let inner = &self.inner;
        let run = inner.bracketer.run(|| vec![inner.load_original(Some(candidate))]);
        inner.spawn(run);
    }

    /// Host changed the `loadable-design-state` option. An embedded image is
    /// loaded first; the snapshot is merged only after that load settles.
    pub fn set_loadable_design_state(&self, snapshot: Option<DesignStateSnapshot>) {
        self.inner.config.write().loadable_design_state = snapshot.clone();
        let Some(snapshot) = snapshot else {
            return;
        };
        let inner = &self.inner;
        let embedded = snapshot.image_src().map(Candidate::from);
        match embedded {
            Some(candidate) if !inner.is_active(&candidate) => {
                let run = inner.bracketer.run(|| {
                    let load = inner.load_original(Some(candidate));
                    vec![inner.then_merge(load, snapshot)]
                });
                inner.spawn(run);
            }
            Some(_) => {
                inner.keep_active();
                inner.merge_loadable(&snapshot);
            }
            None => inner.merge_loadable(&snapshot),
        }
    }

    /// Presentation layer reports the rendered image size.
    pub fn set_shown_image_dimensions(&self, dimensions: ShownImageDimensions) {
        self.inner
            .store
            .dispatch(Action::SetShownImageDimensions(dimensions));
        self.inner.apply_cloud_query();
    }

    /// Re-applies every option, running the change paths for the ones that
    /// differ from the current configuration.
    pub fn update_config(&self, next: EditorConfig) {
        let previous = self.inner.config.read().clone();
        let source_changed = !same_image(previous.source.as_ref(), next.source.as_ref());
        let snapshot_changed = previous.loadable_design_state != next.loadable_design_state;
        let extra = next.translations.clone();

        {
            let mut config = self.inner.config.write();
            let source = config.source.clone();
            let snapshot = config.loadable_design_state.clone();
            *config = next.clone();
            config.source = source;
            config.loadable_design_state = snapshot;
        }
        if extra != previous.translations {
            self.inner.translator.extend(extra);
        }

        if source_changed {
            self.set_source(next.source);
        }
        if snapshot_changed {
            self.set_loadable_design_state(next.loadable_design_state);
        }
        self.inner.sync_unload_veto();
        self.inner.sync_viewport();
        self.inner.apply_cloud_query();
    }

    pub fn set_observe_container_size(&self, observe: bool) {
        self.inner.config.write().observe_plugin_container_size = observe;
        self.inner.sync_viewport();
    }

    pub fn set_avoid_unsaved_alert(&self, avoid: bool) {
        self.inner.config.write().avoid_changes_not_saved_alert_on_leave = avoid;
        self.inner.sync_unload_veto();
    }

    /// Same path as the host bridge's update function.
    pub fn update_state(&self, update: StateUpdate) {
        self.inner.update_state(update);
    }

    pub fn select_tab(&self, tab: TabId) {
        self.inner.store.dispatch(Action::SelectTab(tab));
    }

    pub fn toggle_main_menu(&self, open: bool) {
        self.inner.store.dispatch(Action::SetShownTabsMenu(open));
    }

    pub fn dismiss_feedback(&self) {
        self.inner.store.dispatch(Action::DismissFeedback);
    }

    pub fn current_image_data(&self) -> Option<CurrentImageData> {
        self.inner.current_image_data()
    }

    pub fn state(&self) -> EditorState {
        self.inner.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<EditorState> {
        self.inner.store.subscribe()
    }

    pub fn layout(&self) -> Layout {
        let config = self.inner.config.read();
        self.inner.store.read(|state| state.layout(&config))
    }

    pub fn tabs(&self) -> Vec<Tab> {
        let config = self.inner.config.read();
        tabs::chosen_tabs(&config.tabs_ids, config.use_cloudimage)
    }

    pub fn config(&self) -> EditorConfig {
        self.inner.config.read().clone()
    }

    pub fn translator(&self) -> &Translator {
        &self.inner.translator
    }

    pub fn root_size(&self) -> watch::Receiver<ViewportSize> {
        self.inner.viewport.root_size()
    }

    /// Resolves once no bracketed operation set is outstanding.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.store.subscribe();
        let _ = rx.wait_for(|state| !state.is_loading_globally()).await;
    }

    /// Releases the unload veto and the viewport observer and aborts
    /// background work.
    pub fn unmount(&self) {
        info!("unmounting editor");
        self.inner.unload_veto.lock().take();
        self.inner.viewport.disable();
        self.inner.tasks.lock().abort_all();
    }
}

impl Inner {
    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn active_identity(&self) -> Option<ImageIdentity> {
        self.store
            .read(|state| state.original_image.as_ref().map(ImageHandle::identity))
    }

    fn is_active(&self, candidate: &Candidate) -> bool {
        same_image(Some(candidate), self.active_identity().as_ref())
    }

    fn fetch_request(&self) -> FetchRequest {
        let config = self.config.read();
        FetchRequest {
            default_name: Some(config.default_saved_image_name.clone())
                .filter(|name| !name.trim().is_empty()),
            cross_origin: config.cross_origin(),
        }
    }

    /// Builds the load operation for `candidate`. The dedup decision is taken
    /// now, when the operation is built, not when it is first polled.
    fn load_original(self: &Arc<Self>, candidate: Option<Candidate>) -> Operation {
        let identity = candidate.as_ref().and_then(|c| c.identity());
        let active = self.active_identity();
        match self.guard.decide(identity.as_ref(), active.as_ref()) {
            Decision::AlreadySettled => future::ready(Ok(())).boxed(),
            Decision::Join(in_flight) => in_flight.settled().map(Ok).boxed(),
            Decision::KeepActive(ticket) => {
                self.keep_original(ticket);
                future::ready(Ok(())).boxed()
            }
            Decision::Proceed(ticket) => {
                let finish = FinishOnDrop {
                    inner: Arc::clone(self),
                    ticket,
                };
                async move {
                    let inner = &finish.inner;
                    // Let the caller's state changes land before loading.
                    tokio::task::yield_now().await;
                    let request = inner.fetch_request();
                    match inner.loader.load(candidate, &request).await {
                        Ok(image) => inner.commit(image, ticket),
                        Err(err) => inner.report_load_error(err, ticket),
                    }
                    drop(finish);
                    anyhow::Ok(())
                }
                .boxed()
            }
        }
    }

    /// Runs the snapshot merge once `load` has settled, whatever its outcome.
    fn then_merge(self: &Arc<Self>, load: Operation, snapshot: DesignStateSnapshot) -> Operation {
        let merge_into = Arc::clone(self);
        load.map(move |loaded| {
            merge_into.merge_loadable(&snapshot);
            loaded
        })
        .boxed()
    }

    /// The committed image was requested again; a different image still
    /// loading must not replace it.
    fn keep_active(&self) {
        if let Some(ticket) = self.guard.keep_active() {
            self.keep_original(ticket);
        }
    }

    fn keep_original(&self, ticket: LoadTicket) {
        debug!(ticket, "keeping the committed image");
        self.store.dispatch(Action::KeepOriginalImage { ticket });
    }

    fn commit(&self, image: ImageHandle, ticket: LoadTicket) {
        let previous = self.active_identity();
        let identity = image.identity();
        if !self
            .store
            .dispatch(Action::SetOriginalImage { image, ticket })
        {
            return;
        }
        info!(%identity, ticket, "original image committed");
        if previous.as_ref() != Some(&identity) {
            self.cloud_query.rearm();
        }
        self.apply_cloud_query();
    }

    fn report_load_error(&self, err: LoadError, ticket: LoadTicket) {
        if self.store.read(|state| ticket < state.committed_ticket) {
            debug!(error = %err, ticket, "ignoring failure of a superseded load");
            return;
        }
        warn!(error = %err, "image load failed");
        self.store
            .dispatch(Action::SetFeedback(FeedbackMessage::persistent(err.to_string())));
    }

    fn merge_loadable(&self, snapshot: &DesignStateSnapshot) {
        if snapshot.is_empty() {
            return;
        }
        let patch = snapshot.decode();
        debug!(?patch, "merging loadable design state");
        self.store.dispatch(Action::UpdateState {
            patch: patch.into(),
            origin: PatchOrigin::Loadable,
        });
    }

    fn apply_cloud_query(&self) {
        let patch = {
            let config = self.config.read();
            self.store
                .read(|state| self.cloud_query.resolve(&config, state))
        };
        if let Some(patch) = patch {
            self.store.dispatch(Action::UpdateState {
                patch: patch.into(),
                origin: PatchOrigin::CloudQuery,
            });
        }
    }

    fn fetch_translations(&self) -> Operation {
        let Some(backend) = self.translation_backend.clone() else {
            debug!("backend translations requested without a backend");
            return future::ready(Ok(())).boxed();
        };
        let language = self.config.read().language.clone();
        let translator = self.translator.clone();
        async move {
            let fetched = backend
                .fetch(&language)
                .await
                .with_context(|| format!("failed to fetch translations for '{language}'"))?;
            translator.extend(fetched);
            anyhow::Ok(())
        }
        .boxed()
    }

    fn update_state(&self, update: StateUpdate) {
        match update {
            StateUpdate::Patch(patch) => {
                self.store.dispatch(Action::UpdateState {
                    patch,
                    origin: PatchOrigin::Host,
                });
            }
            StateUpdate::With(f) => {
                self.store.update_with(PatchOrigin::Host, f);
            }
        }
    }

    fn current_image_data(&self) -> Option<CurrentImageData> {
        let config = self.config.read();
        self.store
            .read(|state| bridge::current_image_data(state, &config))
    }

    fn assign_host_slots(self: &Arc<Self>) {
        if let Some(slot) = &self.update_state_slot {
            let weak: Weak<Self> = Arc::downgrade(self);
            let update: UpdateStateFn = Arc::new(move |update| match weak.upgrade() {
                Some(inner) => inner.update_state(update),
                None => debug!("state update after the editor was dropped"),
            });
            slot.set(update);
        }
        if let Some(slot) = &self.current_img_data_slot {
            let weak: Weak<Self> = Arc::downgrade(self);
            let current: CurrentImgDataFn =
                Arc::new(move || weak.upgrade().and_then(|inner| inner.current_image_data()));
            slot.set(current);
        }
    }

    fn sync_unload_veto(&self) {
        let avoid = self.config.read().avoid_changes_not_saved_alert_on_leave;
        let mut veto = self.unload_veto.lock();
        match (&self.unload_signal, avoid) {
            (Some(signal), false) => {
                if veto.is_none() {
                    *veto = Some(UnloadVeto::acquire(
                        Arc::clone(signal),
                        self.store.unsaved_mirror().clone(),
                    ));
                }
            }
            _ => {
                veto.take();
            }
        }
    }

    fn sync_viewport(&self) {
        let observe = self.config.read().observe_plugin_container_size;
        match (&self.container_size, observe) {
            (Some(sizes), true) if !self.viewport.is_enabled() => {
                self.viewport.enable(sizes.clone());
            }
            (_, false) => self.viewport.disable(),
            _ => {}
        }
    }
}

// Releases the guard slot however the load operation ends.
struct FinishOnDrop {
    inner: Arc<Inner>,
    ticket: LoadTicket,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.inner.guard.finish(self.ticket);
    }
}
