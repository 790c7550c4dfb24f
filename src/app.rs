use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::cache::Caches;
use crate::config::Config;
use crate::consolidate::{ConsolidatedReport, Consolidator};
use crate::credentials::{CredentialStore, RegisterOutcome};
use crate::domain::{GroupKey, StoreCode, UserId, Version};
use crate::error::NklError;
use crate::layout::Layout;
use crate::master::{MasterDataset, MasterDatasetManager, MasterUpdate};
use crate::object_store::ObjectStore;
use crate::progress::{GroupProgress, ProgressAggregator, ProgressSnapshot, Totals};
use crate::reconcile::{InputSession, ResultReconciler, SubmitReceipt};
use crate::sheet::decode_xlsx;
use crate::upstream::UpstreamSource;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

fn emit_done(sink: &dyn ProgressSink, started: Instant) {
    sink.event(ProgressEvent {
        message: "phase=Done".to_string(),
        elapsed: Some(started.elapsed()),
    });
}

/// Proof of a successful field-staff login.
#[derive(Debug, Clone)]
pub struct UserSession {
    pub user: UserId,
}

/// Proof of a successful admin login. Only [`App::authorize_admin`] makes one.
#[derive(Debug)]
pub struct AdminToken(());

#[derive(Debug, Clone, Serialize)]
pub struct HomeView {
    pub version: Version,
    pub configured: bool,
    pub totals: Totals,
    pub by_area_manager: Vec<GroupProgress>,
    pub by_area_supervisor: Vec<GroupProgress>,
    #[serde(skip)]
    pub snapshot: ProgressSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSummary {
    pub master_deleted: bool,
    pub results_deleted: usize,
}

pub struct App<S: ObjectStore, U: UpstreamSource> {
    store: Arc<S>,
    layout: Layout,
    caches: Arc<Caches>,
    admin_secret: String,
    master: MasterDatasetManager<S>,
    credentials: CredentialStore<S>,
    progress: ProgressAggregator<S>,
    reconciler: ResultReconciler<S>,
    consolidator: Consolidator<S>,
    upstream: Option<U>,
}

impl<S: ObjectStore, U: UpstreamSource> App<S, U> {
    pub fn new(store: Arc<S>, upstream: Option<U>, config: &Config) -> Self {
        let layout = Layout::new(config.object_store.root.clone());
        let caches = Arc::new(Caches::new(&config.cache));
        Self {
            master: MasterDatasetManager::new(
                Arc::clone(&store),
                layout.clone(),
                Arc::clone(&caches),
            ),
            credentials: CredentialStore::new(
                Arc::clone(&store),
                layout.clone(),
                Arc::clone(&caches),
                &config.credentials,
            ),
            progress: ProgressAggregator::new(Arc::clone(&store), layout.clone()),
            reconciler: ResultReconciler::new(
                Arc::clone(&store),
                layout.clone(),
                Arc::clone(&caches),
            ),
            consolidator: Consolidator::new(Arc::clone(&store), layout.clone()),
            store,
            layout,
            caches,
            admin_secret: config.admin_secret.clone(),
            upstream,
        }
    }

    pub fn master(&self) -> MasterDataset {
        self.master.load()
    }

    pub fn home(&self) -> HomeView {
        let dataset = self.master.load();
        let snapshot = self.progress.compute(&dataset);
        HomeView {
            version: dataset.version.clone(),
            configured: !dataset.is_empty(),
            totals: snapshot.totals(),
            by_area_manager: snapshot.by_group(GroupKey::AreaManager),
            by_area_supervisor: snapshot.by_group(GroupKey::AreaSupervisor),
            snapshot,
        }
    }

    pub fn login(&self, user: &UserId, secret: &str) -> Result<UserSession, NklError> {
        self.credentials.verify(user, secret)?;
        self.caches.invalidate_all();
        info!(user = %user, "user logged in");
        Ok(UserSession { user: user.clone() })
    }

    pub fn register(
        &self,
        user: &UserId,
        secret: &str,
        confirmation: &str,
    ) -> Result<RegisterOutcome, NklError> {
        if secret != confirmation {
            return Err(NklError::PasswordMismatch);
        }
        self.credentials.register(user, secret)
    }

    pub fn open_session(
        &self,
        session: &UserSession,
        store: &StoreCode,
    ) -> Result<InputSession, NklError> {
        info!(user = %session.user, store = %store, "opening input session");
        let dataset = self.master.load();
        self.reconciler.open(&dataset, store)
    }

    pub fn submit(
        &self,
        session: &UserSession,
        input: &InputSession,
    ) -> Result<SubmitReceipt, NklError> {
        info!(user = %session.user, store = %input.store_code, "submitting input");
        self.reconciler.submit(input)
    }

    pub fn authorize_admin(&self, secret: &str) -> Result<AdminToken, NklError> {
        if secret != self.admin_secret {
            return Err(NklError::AdminDenied);
        }
        self.caches.invalidate_all();
        Ok(AdminToken(()))
    }

    pub fn sync_master(
        &self,
        _admin: &AdminToken,
        sink: &dyn ProgressSink,
    ) -> Result<MasterUpdate, NklError> {
        let upstream = self.upstream.as_ref().ok_or_else(|| {
            NklError::ConfigInvalid("upstream section is not configured".to_string())
        })?;
        let started = Instant::now();
        emit(sink, "phase=Fetch; pulling master from upstream");
        let incoming = upstream.pull()?;
        emit(sink, format!("phase=Store; merging {} upstream rows", incoming.len()));
        let update = self.master.upsert(incoming)?;
        emit_done(sink, started);
        Ok(update)
    }

    pub fn upload_master(
        &self,
        _admin: &AdminToken,
        bytes: &[u8],
        sink: &dyn ProgressSink,
    ) -> Result<MasterUpdate, NklError> {
        let started = Instant::now();
        emit(sink, "phase=Verify; reading uploaded sheet");
        let incoming = decode_xlsx(bytes)?;
        emit(sink, format!("phase=Store; merging {} uploaded rows", incoming.len()));
        let update = self.master.upsert(incoming)?;
        emit_done(sink, started);
        Ok(update)
    }

    pub fn delete_master(
        &self,
        _admin: &AdminToken,
        purge_results: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DeleteSummary, NklError> {
        emit(sink, "phase=Store; deleting master dataset");
        let master_deleted = self.master.delete()?;
        let results_deleted = if purge_results {
            self.purge(sink)?
        } else {
            0
        };
        Ok(DeleteSummary {
            master_deleted,
            results_deleted,
        })
    }

    pub fn reset_password(
        &self,
        _admin: &AdminToken,
        user: &UserId,
        secret: &str,
    ) -> Result<(), NklError> {
        self.credentials.reset(user, secret)
    }

    pub fn purge_results(
        &self,
        _admin: &AdminToken,
        sink: &dyn ProgressSink,
    ) -> Result<usize, NklError> {
        self.purge(sink)
    }

    /// Report for `version`, defaulting to the current master round.
    pub fn consolidate(
        &self,
        _admin: &AdminToken,
        version: Option<Version>,
        sink: &dyn ProgressSink,
    ) -> Result<ConsolidatedReport, NklError> {
        let dataset = self.master.load();
        let version = version.unwrap_or_else(|| dataset.version.clone());
        let started = Instant::now();
        emit(sink, format!("phase=Resolve; collecting results for {version}"));
        let report = self.consolidator.consolidate(&dataset, &version)?;
        emit_done(sink, started);
        Ok(report)
    }

    fn purge(&self, sink: &dyn ProgressSink) -> Result<usize, NklError> {
        let paths = self
            .store
            .list(&self.layout.results_prefix())?
            .into_iter()
            .map(|meta| meta.path)
            .collect::<Vec<_>>();
        emit(sink, format!("phase=Store; deleting {} result files", paths.len()));
        let deleted = if paths.is_empty() {
            0
        } else {
            self.store.delete(&paths)?
        };
        self.caches.invalidate_all();
        info!(deleted, "results purged");
        Ok(deleted)
    }
}
