//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use sciportal::client::{
    ContainerImage, ContextResources, Credentials, PortalClient, ServiceError, ServiceResult,
    ServiceUrls, SessionApi,
};
use sciportal::events::PortalEvent;
use sciportal::session::{
    PollingConfig, Session, SessionCoordinator, SessionForm, SessionRequest,
};

pub fn session(id: &str, session_type: &str, status: &str) -> Session {
    Session {
        id: id.to_string(),
        name: format!("{session_type}{id}"),
        session_type: session_type.to_string(),
        status: status.into(),
        connect_url: Some(format!("https://portal.example.org/session/{session_type}/{id}")),
        image: Some("images.example.org/skaha/notebook:1.0".to_string()),
        start_time: Some("2026-10-16T09:00:00Z".to_string()),
    }
}

pub fn context() -> ContextResources {
    ContextResources {
        available_cores: vec![1, 2, 4, 8],
        default_cores: 2,
        available_ram: vec![1, 2, 4, 8, 16],
        default_ram: 8,
    }
}

pub fn image(id: &str, session_type: &str) -> ContainerImage {
    ContainerImage {
        id: id.to_string(),
        session_type: Some(session_type.to_string()),
        digest: None,
    }
}

pub fn forbidden() -> ServiceError {
    ServiceError::Authorization {
        body: "not authorized".to_string(),
    }
}

pub fn server_error() -> ServiceError {
    ServiceError::Server {
        status: 500,
        body: "internal error".to_string(),
    }
}

/// One scripted list response.
#[derive(Debug, Clone)]
pub struct ListStep {
    pub delay: Duration,
    pub result: ServiceResult<Vec<Session>>,
}

impl ListStep {
    pub fn ok(sessions: Vec<Session>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(sessions),
        }
    }

    pub fn err(error: ServiceError) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory session service driven by a script.
///
/// List responses are served in order and the last one repeats. Counters
/// record how the coordinator used the service.
pub struct ScriptedApi {
    lists: Mutex<VecDeque<ListStep>>,
    create_error: Mutex<Option<ServiceError>>,
    delete_error: Mutex<Option<ServiceError>>,
    images: Mutex<ServiceResult<Vec<ContainerImage>>>,
    context: Mutex<ServiceResult<ContextResources>>,
    fetch_delay: Mutex<Duration>,

    list_calls: AtomicUsize,
    lists_in_flight: AtomicUsize,
    max_lists_in_flight: AtomicUsize,
    created: Mutex<Vec<SessionForm>>,
    deleted: Mutex<Vec<String>>,
}

impl Default for ScriptedApi {
    fn default() -> Self {
        Self {
            lists: Mutex::new(VecDeque::from([ListStep::ok(Vec::new())])),
            create_error: Mutex::new(None),
            delete_error: Mutex::new(None),
            images: Mutex::new(Ok(vec![
                image("images.example.org/skaha/notebook:1.0", "notebook"),
                image("images.example.org/skaha/notebook:0.9", "notebook"),
            ])),
            context: Mutex::new(Ok(context())),
            fetch_delay: Mutex::new(Duration::ZERO),
            list_calls: AtomicUsize::new(0),
            lists_in_flight: AtomicUsize::new(0),
            max_lists_in_flight: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedApi {
    pub fn with_lists(steps: Vec<ListStep>) -> Arc<Self> {
        let api = Self::default();
        *api.lists.lock().unwrap() = steps.into();
        Arc::new(api)
    }

    pub fn returning(lists: Vec<Vec<Session>>) -> Arc<Self> {
        Self::with_lists(lists.into_iter().map(ListStep::ok).collect())
    }

    /// Replace the remaining script.
    pub fn script(&self, steps: Vec<ListStep>) {
        *self.lists.lock().unwrap() = steps.into();
    }

    pub fn fail_create(&self, error: ServiceError) {
        *self.create_error.lock().unwrap() = Some(error);
    }

    pub fn fail_delete(&self, error: ServiceError) {
        *self.delete_error.lock().unwrap() = Some(error);
    }

    pub fn set_images(&self, images: ServiceResult<Vec<ContainerImage>>) {
        *self.images.lock().unwrap() = images;
    }

    pub fn set_context(&self, context: ServiceResult<ContextResources>) {
        *self.context.lock().unwrap() = context;
    }

    /// Delay applied to image and context fetches.
    pub fn delay_fetches(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn max_lists_in_flight(&self) -> usize {
        self.max_lists_in_flight.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> Vec<SessionForm> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn next_list(&self) -> ListStep {
        let mut lists = self.lists.lock().unwrap();
        if lists.len() > 1 {
            lists.pop_front().unwrap()
        } else {
            lists.front().cloned().unwrap()
        }
    }
}

#[async_trait]
impl SessionApi for ScriptedApi {
    async fn list_sessions(&self) -> ServiceResult<Vec<Session>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.lists_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lists_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let step = self.next_list();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        self.lists_in_flight.fetch_sub(1, Ordering::SeqCst);
        step.result
    }

    async fn create_session(&self, form: &SessionForm) -> ServiceResult<SessionRequest> {
        if let Some(error) = self.create_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.created.lock().unwrap().push(form.clone());
        Ok(SessionRequest::from(form))
    }

    async fn delete_session(&self, session_id: &str) -> ServiceResult<()> {
        if let Some(error) = self.delete_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.deleted.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn list_container_images(&self, _session_type: &str) -> ServiceResult<Vec<ContainerImage>> {
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.images.lock().unwrap().clone()
    }

    async fn get_context_resources(&self) -> ServiceResult<ContextResources> {
        let delay = *self.fetch_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.context.lock().unwrap().clone()
    }
}

/// Events recorded in publish order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PortalEvent>>>,
}

impl EventLog {
    pub fn attach(coordinator: &SessionCoordinator) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        coordinator
            .events()
            .subscribe(move |event| events.lock().unwrap().push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<PortalEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<&'static str> {
        self.events().iter().map(PortalEvent::topic).collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics().into_iter().filter(|t| *t == topic).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub fn fast_polling() -> PollingConfig {
    PollingConfig {
        interval: Duration::from_millis(100),
        ..PollingConfig::default()
    }
}

pub fn coordinator(api: &Arc<ScriptedApi>) -> (SessionCoordinator, EventLog) {
    coordinator_with(api, PollingConfig::default())
}

pub fn coordinator_with(
    api: &Arc<ScriptedApi>,
    config: PollingConfig,
) -> (SessionCoordinator, EventLog) {
    let api: Arc<dyn SessionApi> = api.clone();
    let coordinator = SessionCoordinator::new(api, config);
    let log = EventLog::attach(&coordinator);
    (coordinator, log)
}

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Client for a stub backend mounted at `/skaha/v0`.
pub fn client_for(addr: SocketAddr, credentials: &Credentials) -> PortalClient {
    let urls = ServiceUrls::from_base(&format!("http://{addr}/skaha/v0"));
    PortalClient::with_timeout(urls, credentials, Duration::from_secs(5)).unwrap()
}
