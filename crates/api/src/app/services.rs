//! Service wiring: store backend selection and the shared handle injected
//! into every handler.

use std::ops::Deref;
use std::sync::Arc;

use tracing::info;

use bierp_events::EventBus;
use bierp_infra::services::{AuditRecorder, Notifier};
use bierp_infra::{InMemoryStore, PostgresStore, ServiceSettings, Services, Store};

use crate::settings::Settings;

/// Everything a handler needs, shared behind `Extension(Arc<AppServices>)`.
pub struct AppServices {
    services: Services,
    notifier: Arc<Notifier>,
}

impl AppServices {
    pub fn new(store: Arc<dyn Store>, settings: ServiceSettings) -> Self {
        let notifier = Arc::new(Notifier::new());
        let services = Services::new(store, notifier.clone(), settings);
        Self { services, notifier }
    }

    /// Fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), ServiceSettings::default())
    }

    /// Postgres when `database_url` is set, otherwise the in-memory store.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let service_settings = ServiceSettings {
            approval_expiry: settings.approval_expiry(),
        };
        let store: Arc<dyn Store> = match settings.database_url.as_deref() {
            Some(url) => {
                let store = PostgresStore::connect(url, settings.database_max_connections).await?;
                store.ensure_schema().await?;
                info!(max_connections = settings.database_max_connections, "using postgres store");
                Arc::new(store)
            }
            None => {
                info!("DATABASE_URL not set; using in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };
        Ok(Self::new(store, service_settings))
    }

    pub fn recorder(&self) -> &AuditRecorder {
        self.services.audit.recorder()
    }

    /// Log every owner notification until the bus goes away. Push delivery
    /// to devices is handled outside this service.
    pub fn spawn_notification_log(&self) -> std::io::Result<()> {
        let inbox = self.notifier.subscribe();
        std::thread::Builder::new()
            .name("notification-log".into())
            .spawn(move || {
                while let Ok(notification) = inbox.recv() {
                    info!(
                        kind = notification.kind.as_str(),
                        entity_id = %notification.entity_id,
                        message = %notification.message,
                        "owner notification"
                    );
                }
            })?;
        Ok(())
    }
}

impl Deref for AppServices {
    type Target = Services;

    fn deref(&self) -> &Services {
        &self.services
    }
}
