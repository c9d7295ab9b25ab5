use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::{Backend, BackendError, ChangeFilter, Subscription};
use crate::libs::backend::records::{MessageRecord, NewMessage};
use crate::libs::core::models::{Identity, Message};
use crate::libs::session::SessionStore;
use crate::libs::toast::NotificationCenter;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Sign in to continue")]
    NotSignedIn,
    #[error("No conversation is open")]
    NoConversation,
    #[error("Unknown user {0}")]
    UnknownPeer(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversationView {
    PeerList,
    Open { peer: Identity },
}

struct ActiveConversation {
    peer: Identity,
    messages: Arc<RwLock<Vec<Message>>>,
    draft: String,
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl ActiveConversation {
    async fn shut_down(self) {
        self.cancel.cancel();
        if let Err(e) = self.listener.await {
            warn!(error = %e, "message listener ended abnormally");
        }
        debug!(peer_id = %self.peer.id, "conversation closed");
    }
}

/// One-to-one chat. At most one conversation is open, and only it has a live
/// inbound subscription.
pub struct ConversationStore {
    backend: Arc<dyn Backend>,
    session: Arc<SessionStore>,
    toasts: NotificationCenter,
    parent: CancellationToken,
    peers: RwLock<Vec<Identity>>,
    active: Mutex<Option<ActiveConversation>>,
    version: watch::Sender<u64>,
}

impl ConversationStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        session: Arc<SessionStore>,
        toasts: NotificationCenter,
        parent: CancellationToken,
    ) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            backend,
            session,
            toasts,
            parent,
            peers: RwLock::new(Vec::new()),
            active: Mutex::new(None),
            version,
        }
    }

    /// Bumped whenever the open conversation gains messages or changes peer.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Everyone except the signed-in user.
    pub async fn list_peers(&self) -> Result<Vec<Identity>, ConversationError> {
        let me = self.session.identity().ok_or(ConversationError::NotSignedIn)?;
        let profiles = match self.backend.list_profiles_except(&me.id).await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, "loading people failed");
                self.toasts.error("Could not load people");
                return Err(e.into());
            }
        };

        let peers: Vec<Identity> = profiles.iter().map(Identity::from_profile).collect();
        *self.peers.write().await = peers.clone();
        Ok(peers)
    }

    /// Closes the current conversation (and its subscription) first, then
    /// subscribes to the peer's messages and loads the history.
    pub async fn open_conversation(&self, peer_id: &str) -> Result<Vec<Message>, ConversationError> {
        let me = self.session.identity().ok_or(ConversationError::NotSignedIn)?;
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.shut_down().await;
            self.bump();
        }

        let peer = self.find_peer(peer_id).await?;
        let opened = async {
            let subscription = self
                .backend
                .subscribe(ChangeFilter::inserts("messages").eq("sender_id", &peer.id))
                .await?;
            let history = self.backend.list_conversation(&me.id, &peer.id).await?;
            Ok::<_, BackendError>((subscription, history))
        }
        .await;
        let (subscription, history) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(peer_id = %peer.id, error = %e, "opening conversation failed");
                self.toasts.error("Could not open the conversation");
                return Err(e.into());
            }
        };

        let messages = Arc::new(RwLock::new(Vec::new()));
        merge(
            &mut *messages.write().await,
            history.into_iter().map(Message::from),
        );
        let snapshot = messages.read().await.clone();

        let cancel = self.parent.child_token();
        let listener = tokio::spawn(deliver_inbound(
            subscription,
            Arc::clone(&messages),
            peer.id.clone(),
            me.id.clone(),
            cancel.clone(),
            self.version.clone(),
        ));

        info!(peer_id = %peer.id, count = snapshot.len(), "conversation opened");
        *active = Some(ActiveConversation {
            peer,
            messages,
            draft: String::new(),
            cancel,
            listener,
        });
        drop(active);
        self.bump();
        Ok(snapshot)
    }

    /// Back to the peer list; the inbound subscription ends here.
    pub async fn close_conversation(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.shut_down().await;
            self.bump();
        }
    }

    /// Sends to the open conversation and appends the stored row locally. Blank
    /// content is a no-op.
    pub async fn send(&self, content: &str) -> Result<Option<Message>, ConversationError> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let me = self.session.identity().ok_or(ConversationError::NotSignedIn)?;
        let (peer_id, messages) = {
            let active = self.active.lock().await;
            let conversation = active.as_ref().ok_or(ConversationError::NoConversation)?;
            (conversation.peer.id.clone(), Arc::clone(&conversation.messages))
        };

        let new_message = NewMessage {
            sender_id: me.id,
            receiver_id: peer_id,
            content: content.to_string(),
        };
        let record = match self.backend.insert_message(&new_message).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "sending message failed");
                self.toasts.error("Message not sent");
                return Err(e.into());
            }
        };

        let message = Message::from(record);
        if merge(&mut *messages.write().await, [message.clone()]) {
            self.bump();
        }
        Ok(Some(message))
    }

    pub async fn set_draft(&self, draft: impl Into<String>) -> Result<(), ConversationError> {
        let mut active = self.active.lock().await;
        let conversation = active.as_mut().ok_or(ConversationError::NoConversation)?;
        conversation.draft = draft.into();
        Ok(())
    }

    pub async fn draft(&self) -> String {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|conversation| conversation.draft.clone())
            .unwrap_or_default()
    }

    /// Sends the draft; it is cleared only once the message is stored.
    pub async fn send_draft(&self) -> Result<Option<Message>, ConversationError> {
        let draft = self.draft().await;
        let sent = self.send(&draft).await?;
        if sent.is_some() {
            let mut active = self.active.lock().await;
            if let Some(conversation) = active.as_mut() {
                if conversation.draft == draft {
                    conversation.draft.clear();
                }
            }
        }
        Ok(sent)
    }

    pub async fn messages(&self) -> Vec<Message> {
        let messages = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|conversation| Arc::clone(&conversation.messages));
        match messages {
            Some(messages) => messages.read().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn active_peer(&self) -> Option<Identity> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|conversation| conversation.peer.clone())
    }

    pub async fn view(&self) -> ConversationView {
        match self.active_peer().await {
            Some(peer) => ConversationView::Open { peer },
            None => ConversationView::PeerList,
        }
    }

    async fn find_peer(&self, peer_id: &str) -> Result<Identity, ConversationError> {
        if let Some(peer) = self.peers.read().await.iter().find(|peer| peer.id == peer_id) {
            return Ok(peer.clone());
        }
        match self.backend.load_profile(peer_id).await? {
            Some(profile) => Ok(Identity::from_profile(&profile)),
            None => Err(ConversationError::UnknownPeer(peer_id.to_string())),
        }
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

async fn deliver_inbound(
    mut subscription: Subscription,
    messages: Arc<RwLock<Vec<Message>>>,
    peer_id: String,
    my_id: String,
    cancel: CancellationToken,
    version: watch::Sender<u64>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.next() => event,
        };
        let Some(event) = event else {
            break;
        };

        let message = match event.record_as::<MessageRecord>() {
            Ok(record) => Message::from(record),
            Err(e) => {
                warn!(error = %e, "unreadable message event");
                continue;
            }
        };
        if message.sender_id != peer_id || message.receiver_id != my_id {
            continue;
        }
        if merge(&mut *messages.write().await, [message]) {
            version.send_modify(|v| *v += 1);
        }
    }
    subscription.unsubscribe();
}

/// Adds messages not already present (by id) and keeps the list in send order.
fn merge(buffer: &mut Vec<Message>, incoming: impl IntoIterator<Item = Message>) -> bool {
    let mut changed = false;
    for message in incoming {
        if !buffer.iter().any(|existing| existing.id == message.id) {
            buffer.push(message);
            changed = true;
        }
    }
    if changed {
        buffer.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
    changed
}
