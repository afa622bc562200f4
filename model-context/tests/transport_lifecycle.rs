use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use model_context::primitives::ChannelId;
use model_context::transport::{Role, RpcChannel, TransportObserver, TransportState};
use model_context::{
    ClientTransport, ModelContext, ModelContextOptions, TransportConfig, TransportError, Window,
};

#[derive(Default)]
struct CloseCounter {
    closes: AtomicUsize,
    errors: AtomicUsize,
}

impl TransportObserver for CloseCounter {
    fn on_close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _error: &TransportError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

fn client(page: &Window, timeout: Duration) -> ClientTransport {
    ClientTransport::new(
        RpcChannel::new(Role::Client, page.clone(), page.clone(), ChannelId::default()),
        TransportConfig::new(timeout),
    )
}

#[tokio::test]
async fn silent_server_times_out() {
    let page = Window::new("https://shop.example");
    let client = client(&page, Duration::from_millis(100));
    let counter = Arc::new(CloseCounter::default());
    client.set_observer(counter.clone());

    let started = tokio::time::Instant::now();
    let err = client.connect().await.unwrap_err();
    assert_eq!(err, TransportError::HandshakeTimeout { timeout_ms: 100 });
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(client.is_closed());
    assert_eq!(counter.closes.load(Ordering::SeqCst), 1);
    assert!(client.list_tools().await.is_err());
}

#[tokio::test]
async fn navigation_closes_the_transport() {
    let page = Window::new("https://shop.example");
    let _handle = ModelContext::initialize(&page, ModelContextOptions::new()).unwrap();
    let client = client(&page, Duration::from_secs(1));
    let counter = Arc::new(CloseCounter::default());
    client.set_observer(counter.clone());

    client.connect().await.unwrap();
    assert!(client.list_tools().await.unwrap().is_empty());

    page.navigate(None);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(counter.closes.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), TransportState::Closed);
    assert_eq!(client.list_tools().await.unwrap_err(), TransportError::Navigated);
}

#[tokio::test]
async fn server_started_late_is_found_by_the_probe() {
    let page = Window::new("https://shop.example");
    let client = client(&page, Duration::from_secs(1));
    let connect = tokio::spawn(async move {
        client.connect().await?;
        client.ping().await?;
        Ok::<_, TransportError>(client)
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let _handle = ModelContext::initialize(&page, ModelContextOptions::new()).unwrap();

    let client = connect.await.unwrap().unwrap();
    assert_eq!(client.state(), TransportState::Ready);
}

#[tokio::test]
async fn other_channels_are_invisible() {
    let page = Window::new("https://shop.example");
    let _handle = ModelContext::initialize(
        &page,
        ModelContextOptions::new().channel(ChannelId::new("checkout").unwrap()),
    )
    .unwrap();

    let stranger = client(&page, Duration::from_millis(50));
    assert!(matches!(
        stranger.connect().await,
        Err(TransportError::HandshakeTimeout { .. })
    ));

    let neighbour = ClientTransport::new(
        RpcChannel::new(Role::Client, page.clone(), page.clone(), ChannelId::new("checkout").unwrap()),
        TransportConfig::default(),
    );
    neighbour.connect().await.unwrap();
}
