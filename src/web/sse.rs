//! Change feed pushed to both portals over server-sent events.
//!
//! Every mutation publishes a [`ChangeEvent`]. Subscribers never receive row
//! data, only enough to decide what to re-fetch.
//!
//! An open stream stays bound to the session that opened it. The session is
//! re-resolved before anything is delivered and on a fixed interval; once it
//! no longer resolves, or reaches its expiry, the stream sends `signed_out`
//! and ends.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use crate::auth::{AuthService, Principal};

const DEFAULT_CAPACITY: usize = 256;
const SESSION_RECHECK: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    Clients,
    Accounts,
    Tasks,
    ChatMessages,
    Resources,
    Offers,
    AgencyUpdates,
    WeeklyProducts,
    Requests,
    Settings,
}

impl ChangeTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Accounts => "accounts",
            Self::Tasks => "tasks",
            Self::ChatMessages => "chat_messages",
            Self::Resources => "resources",
            Self::Offers => "offers",
            Self::AgencyUpdates => "agency_updates",
            Self::WeeklyProducts => "weekly_products",
            Self::Requests => "requests",
            Self::Settings => "settings",
        }
    }

    /// Agency content that every client may see when it is not owned by one.
    fn is_shared_content(self) -> bool {
        matches!(
            self,
            Self::Resources | Self::Offers | Self::AgencyUpdates | Self::WeeklyProducts
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub action: ChangeAction,
    pub id: Uuid,
    /// Owning client, if the row belongs to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
}

impl ChangeEvent {
    pub fn new(
        table: ChangeTable,
        action: ChangeAction,
        id: Uuid,
        client_id: Option<Uuid>,
    ) -> Self {
        Self {
            table,
            action,
            id,
            client_id,
        }
    }

    /// Whether `principal` should hear about this change.
    pub fn visible_to(&self, principal: &Principal) -> bool {
        if principal.is_admin() {
            return true;
        }
        let Some(own) = principal.client_id else {
            return false;
        };
        match self.client_id {
            Some(owner) => owner == own,
            None => self.table.is_shared_content(),
        }
    }

    fn to_sse(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_default();
        Event::default().event("change").data(data)
    }
}

/// Broadcast hub for [`ChangeEvent`]s.
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(
            table = event.table.as_str(),
            action = ?event.action,
            id = %event.id,
            "Change published"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// SSE stream of the events visible to `principal`.
    ///
    /// A subscriber that falls behind receives a single `resync` event in
    /// place of the dropped ones and should re-fetch everything it shows.
    pub fn stream_for(
        &self,
        principal: Principal,
        watch: SessionWatch,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + use<> {
        let ready = futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().event("ready").data("{}"))
        });
        let live = self
            .items(principal, watch)
            .map(|item| Ok::<_, Infallible>(item.into_event()));
        ready.chain(live)
    }

    fn items(
        &self,
        principal: Principal,
        watch: SessionWatch,
    ) -> impl Stream<Item = FeedItem> + Send + use<> {
        let mut recheck = tokio::time::interval_at(
            tokio::time::Instant::now() + watch.recheck,
            watch.recheck,
        );
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let subscriber = Subscriber {
            rx: BroadcastStream::new(self.subscribe()),
            principal,
            watch,
            recheck,
            signed_out: false,
        };
        futures::stream::unfold(subscriber, |mut sub| async move {
            if sub.signed_out {
                return None;
            }
            let item = sub.next_item().await?;
            sub.signed_out = item == FeedItem::SignedOut;
            Some((item, sub))
        })
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// The session behind an open stream.
pub struct SessionWatch {
    auth: AuthService,
    token: String,
    expires_at: DateTime<Utc>,
    recheck: Duration,
}

impl SessionWatch {
    pub fn new(auth: AuthService, token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            auth,
            token,
            expires_at,
            recheck: SESSION_RECHECK,
        }
    }

    /// Whom the session resolves to now, or `None` once it has ended.
    /// Lookup failures count as ended.
    async fn current(&self) -> Option<Principal> {
        if Utc::now() >= self.expires_at {
            return None;
        }
        match self.auth.resolve(&self.token).await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!("Failed to re-check change feed session: {}", e);
                None
            }
        }
    }

    fn until_expiry(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }
}

struct Subscriber {
    rx: BroadcastStream<ChangeEvent>,
    principal: Principal,
    watch: SessionWatch,
    recheck: Interval,
    signed_out: bool,
}

enum Wake {
    Received(Option<Result<ChangeEvent, BroadcastStreamRecvError>>),
    Recheck,
    Expired,
}

impl Subscriber {
    /// Next item for the client; `None` when the feed itself has closed.
    async fn next_item(&mut self) -> Option<FeedItem> {
        loop {
            let wake = tokio::select! {
                received = self.rx.next() => Wake::Received(received),
                _ = self.recheck.tick() => Wake::Recheck,
                _ = tokio::time::sleep(self.watch.until_expiry()) => Wake::Expired,
            };
            match wake {
                Wake::Received(None) => return None,
                Wake::Received(Some(received)) => {
                    let Some(item) = deliverable(received, &self.principal) else {
                        continue;
                    };
                    let Some(principal) = self.watch.current().await else {
                        return Some(FeedItem::SignedOut);
                    };
                    self.principal = principal;
                    if let FeedItem::Change(event) = &item
                        && !event.visible_to(&self.principal)
                    {
                        continue;
                    }
                    return Some(item);
                }
                Wake::Recheck => match self.watch.current().await {
                    Some(principal) => self.principal = principal,
                    None => return Some(FeedItem::SignedOut),
                },
                Wake::Expired => return Some(FeedItem::SignedOut),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum FeedItem {
    Change(ChangeEvent),
    Resync { skipped: u64 },
    SignedOut,
}

impl FeedItem {
    fn into_event(self) -> Event {
        match self {
            Self::Change(event) => event.to_sse(),
            Self::Resync { skipped } => Event::default()
                .event("resync")
                .data(format!("{{\"skipped\":{skipped}}}")),
            Self::SignedOut => Event::default().event("signed_out").data("{}"),
        }
    }
}

fn deliverable(
    item: Result<ChangeEvent, BroadcastStreamRecvError>,
    principal: &Principal,
) -> Option<FeedItem> {
    match item {
        Ok(event) if event.visible_to(principal) => Some(FeedItem::Change(event)),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::debug!(skipped, "Change feed subscriber lagged");
            Some(FeedItem::Resync { skipped })
        }
    }
}
