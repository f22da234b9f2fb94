use std::time::Duration;

use futures_util::StreamExt;
use livehttpd::{Reloader, Server, ServerConfig};
use tokio::{net::TcpStream, sync::oneshot, task::JoinHandle, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    dir: tempfile::TempDir,
    url: String,
    reloader: Reloader,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), livehttpd::Error>>,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();

    let server = Server::new(ServerConfig {
        root: dir.path().to_path_buf(),
        host: "127.0.0.1".to_owned(),
        port: 0,
        debounce: Duration::from_millis(20),
        ..ServerConfig::default()
    })
    .unwrap();
    let listening = server.bind().await.unwrap();
    let url = format!("ws://{}/", listening.local_addr());
    let reloader = listening.reloader();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(listening.serve(async {
        stopped.await.ok();
    }));

    Running {
        dir,
        url,
        reloader,
        stop,
        task,
    }
}

async fn connect(url: &str) -> Socket {
    let (socket, _) = connect_async(url).await.unwrap();
    socket
}

async fn wait_for_clients(reloader: &Reloader, count: usize) {
    timeout(Duration::from_secs(5), async {
        while reloader.client_count() != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients did not (un)register in time");
}

async fn next_text(socket: &mut Socket) -> String {
    let message = timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("no message in time")
        .expect("socket ended")
        .unwrap();
    message.to_text().unwrap().to_owned()
}

#[tokio::test]
async fn reload_reaches_all_open_clients() {
    let running = start().await;
    let mut sockets = Vec::new();
    for _ in 0..3 {
        sockets.push(connect(&running.url).await);
    }
    wait_for_clients(&running.reloader, 3).await;

    let mut closed = sockets.pop().unwrap();
    closed.close(None).await.unwrap();
    wait_for_clients(&running.reloader, 2).await;

    assert_eq!(running.reloader.reload(), 2);
    for socket in &mut sockets {
        assert_eq!(next_text(socket).await, "reload");
    }

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn file_change_triggers_reload() {
    let running = start().await;
    let mut socket = connect(&running.url).await;
    wait_for_clients(&running.reloader, 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(running.dir.path().join("index.html"), "<h1>changed</h1>").unwrap();
    assert_eq!(next_text(&mut socket).await, "reload");

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_reload_clients() {
    let running = start().await;
    let mut socket = connect(&running.url).await;
    wait_for_clients(&running.reloader, 1).await;

    running.stop.send(()).unwrap();

    let ended = timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "socket stayed open after shutdown");
    assert_eq!(running.reloader.client_count(), 0);

    timeout(Duration::from_secs(10), running.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
