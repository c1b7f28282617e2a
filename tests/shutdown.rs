use hearth::prelude::networking::TcpStream;
use hearth_testing::prelude::*;

#[tokio::test]
async fn basic() {
    let server = ServerBuilder::default()
        .with_routes(|routes| {
            routes.add(
                "/slow-response",
                Route::public(routing::handler(|_| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, Error>(Answer::new("Finally here!", "text/plain").into())
                })),
            );
        })
        .run()
        .await;

    tokio::time::timeout(Duration::from_millis(1000), async move {
        let shutdown = server.get_shutdown_manager();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.shutdown();
        });

        let response = server.get("/slow-response").send().await.unwrap();
        assert_eq!(
            response.headers().get("connection").unwrap(),
            "close",
            "answers during shutdown close the connection"
        );
        assert_eq!(response.text().await.unwrap(), "Finally here!");
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn idle_connections_close() {
    let server = ServerBuilder::default().http().run().await;
    let manager = server.get_shutdown_manager();

    // a idle keep-alive connection doesn't hold up the shutdown
    let mut stream = server.connect().await;
    stream
        .write_all(b"GET /missing HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buffer = [0; 512];
    let read = stream.read(&mut buffer).await.unwrap();
    assert!(buffer[..read].starts_with(b"HTTP/1.1 404 Not Found\r\n"));

    manager.shutdown();
    // the server closes it's end
    let read = stream.read(&mut buffer).await.unwrap();
    assert_eq!(read, 0);
    drop(stream);
    tokio::time::timeout(Duration::from_millis(1000), manager.wait())
        .await
        .unwrap();
    assert_eq!(manager.connections(), 0);

    // the listener is gone
    let port = server.port();
    let refused = TcpStream::connect(SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), port))
        .await
        .unwrap_err();
    assert_eq!(refused.kind(), io::ErrorKind::ConnectionRefused);
}
