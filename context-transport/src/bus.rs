//! In-process model of browsing contexts exchanging `postMessage` traffic.
//!
//! A [`Window`] has an origin, a document generation, and a set of listeners.
//! Posting to a window queues a [`MessageEvent`] on every current listener.
//! Navigating the window starts a new document: listeners receive
//! [`BusEvent::Unload`] and are then detached.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use context_primitives::WindowId;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Target origin that matches every window.
pub const ANY_ORIGIN: &str = "*";

/// A message delivered to a window.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Window that posted the message.
    pub source: WindowId,
    /// Origin of the posting window at send time.
    pub origin: String,
    /// Structured-cloned payload.
    pub data: Value,
}

/// What a listener observes.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A posted message.
    Message(MessageEvent),
    /// The document is going away; the listener is detached afterwards.
    Unload,
}

struct WindowInner {
    id: WindowId,
    origin: RwLock<String>,
    generation: AtomicU64,
    parent: Option<Weak<WindowInner>>,
    listeners: Mutex<Vec<(u64, mpsc::UnboundedSender<BusEvent>)>>,
    next_listener: AtomicU64,
}

/// Handle to a browsing context. Clones refer to the same window.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("origin", &self.origin())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Window {}

impl Window {
    /// Creates a top-level window.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self::with_parent(origin.into(), None)
    }

    /// Creates a child frame embedded in this window.
    #[must_use]
    pub fn frame(&self, origin: impl Into<String>) -> Self {
        Self::with_parent(origin.into(), Some(Arc::downgrade(&self.inner)))
    }

    fn with_parent(origin: String, parent: Option<Weak<WindowInner>>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId::random(),
                origin: RwLock::new(origin),
                generation: AtomicU64::new(0),
                parent,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Returns the window identifier.
    #[must_use]
    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    /// Returns the current document's origin.
    ///
    /// # Panics
    ///
    /// Panics if the origin lock is poisoned.
    #[must_use]
    pub fn origin(&self) -> String {
        self.inner.origin.read().expect("window origin poisoned").clone()
    }

    /// Returns the document generation, bumped on every navigation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Returns the embedding window, if this is a frame whose parent is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Attaches a listener to the current document.
    ///
    /// # Panics
    ///
    /// Panics if the listener lock is poisoned.
    #[must_use]
    pub fn listen(&self) -> WindowListener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("window listeners poisoned")
            .push((id, tx));
        WindowListener {
            window: Arc::downgrade(&self.inner),
            id,
            rx,
        }
    }

    /// Returns the number of attached listeners.
    ///
    /// # Panics
    ///
    /// Panics if the listener lock is poisoned.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .expect("window listeners poisoned")
            .len()
    }

    /// Posts `data` to this window on behalf of `source`.
    ///
    /// Delivery happens only when `target_origin` is `*` or equals this
    /// window's origin. Returns the number of listeners reached.
    ///
    /// # Panics
    ///
    /// Panics if the listener lock is poisoned.
    pub fn post_message(&self, data: Value, source: &Self, target_origin: &str) -> usize {
        let origin = self.origin();
        if target_origin != ANY_ORIGIN && target_origin != origin {
            trace!(window = %self.id(), target_origin, %origin, "target origin mismatch; dropping message");
            return 0;
        }

        let event = BusEvent::Message(MessageEvent {
            source: source.id(),
            origin: source.origin(),
            data,
        });

        let mut listeners = self.inner.listeners.lock().expect("window listeners poisoned");
        listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        listeners.len()
    }

    /// Navigates to a new document, optionally changing origin.
    ///
    /// # Panics
    ///
    /// Panics if the listener or origin lock is poisoned.
    pub fn navigate(&self, new_origin: Option<&str>) {
        let detached = std::mem::take(
            &mut *self.inner.listeners.lock().expect("window listeners poisoned"),
        );
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(origin) = new_origin {
            *self.inner.origin.write().expect("window origin poisoned") = origin.to_owned();
        }
        debug!(window = %self.id(), generation, listeners = detached.len(), "window navigated");

        for (_, tx) in detached {
            let _ = tx.send(BusEvent::Unload);
        }
    }
}

/// Receiving end attached to one window document. Detaches on drop.
pub struct WindowListener {
    window: Weak<WindowInner>,
    id: u64,
    rx: mpsc::UnboundedReceiver<BusEvent>,
}

impl fmt::Debug for WindowListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl WindowListener {
    /// Waits for the next event. Returns `None` after the document unloaded
    /// and every queued event was drained.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

impl Drop for WindowListener {
    fn drop(&mut self) {
        if let Some(inner) = self.window.upgrade() {
            if let Ok(mut listeners) = inner.listeners.lock() {
                listeners.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_to_matching_origin() {
        let page = Window::new("https://shop.example");
        let mut listener = page.listen();

        assert_eq!(page.post_message(json!("hi"), &page, "https://shop.example"), 1);
        assert_eq!(page.post_message(json!("no"), &page, "https://evil.example"), 0);
        assert_eq!(page.post_message(json!("any"), &page, ANY_ORIGIN), 1);

        let Some(BusEvent::Message(first)) = listener.recv().await else {
            panic!("expected message");
        };
        assert_eq!(first.data, json!("hi"));
        assert_eq!(first.origin, "https://shop.example");
        assert_eq!(first.source, page.id());

        let Some(BusEvent::Message(second)) = listener.recv().await else {
            panic!("expected message");
        };
        assert_eq!(second.data, json!("any"));
    }

    #[tokio::test]
    async fn navigation_unloads_and_detaches() {
        let page = Window::new("https://shop.example");
        let mut listener = page.listen();
        assert_eq!(page.generation(), 0);

        page.navigate(Some("https://checkout.example"));
        assert_eq!(page.generation(), 1);
        assert_eq!(page.origin(), "https://checkout.example");
        assert_eq!(page.listener_count(), 0);

        assert_eq!(listener.recv().await, Some(BusEvent::Unload));
        assert_eq!(listener.recv().await, None);
        assert_eq!(page.post_message(json!(1), &page, ANY_ORIGIN), 0);
    }

    #[tokio::test]
    async fn frames_link_to_parent() {
        let top = Window::new("https://shop.example");
        let widget = top.frame("https://widget.example");
        assert_eq!(widget.parent(), Some(top.clone()));
        assert_eq!(top.parent(), None);

        let mut listener = top.listen();
        top.post_message(json!("from frame"), &widget, "https://shop.example");
        let Some(BusEvent::Message(event)) = listener.recv().await else {
            panic!("expected message");
        };
        assert_eq!(event.source, widget.id());
        assert_eq!(event.origin, "https://widget.example");
    }

    #[test]
    fn dropped_listener_detaches() {
        let page = Window::new("https://shop.example");
        let listener = page.listen();
        assert_eq!(page.listener_count(), 1);
        drop(listener);
        assert_eq!(page.listener_count(), 0);
    }
}
