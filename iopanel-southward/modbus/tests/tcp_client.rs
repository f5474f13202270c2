mod common;

use common::{init_tracing, panel_registers, start_test_server, Recorded, RegisterBank};
use iopanel_driver_modbus::{ChannelClientConfig, ModbusChannelClient, TcpConnector};
use iopanel_sdk::{
    ConnectError, ConnectionState, Endpoint, ErrorKind, ReadError, TransportError,
};
use std::{sync::Arc, time::Duration};

fn tcp_client() -> ModbusChannelClient {
    ModbusChannelClient::new(
        ChannelClientConfig::default(),
        Arc::new(TcpConnector::new(
            Duration::from_secs(2),
            Duration::from_secs(2),
        )),
    )
}

#[tokio::test]
async fn test_tcp_read_all_channels() {
    init_tracing();
    let bank = RegisterBank::with_values(0, &panel_registers());
    let (addr, _server) = start_test_server(bank.clone()).await;

    let client = tcp_client();
    client
        .connect(Endpoint::new(addr.ip().to_string(), addr.port()))
        .await
        .unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    let states = client.read_all_channels(12).await.unwrap();
    let on: Vec<bool> = states.iter().map(|s| s.is_on).collect();
    assert_eq!(
        on,
        vec![true, false, true, false, false, false, false, false, false, false, false, false]
    );
    assert_eq!(
        bank.requests(),
        vec![Recorded::Read {
            address: 0,
            count: 12
        }]
    );

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_tcp_host_name_falls_through_to_listening_address() {
    init_tracing();
    let bank = RegisterBank::with_values(0, &panel_registers());
    // listens on IPv4 only while "localhost" may resolve to ::1 first
    let (addr, _server) = start_test_server(bank).await;

    let client = tcp_client();
    client
        .connect(Endpoint::new("localhost", addr.port()))
        .await
        .unwrap();
    assert_eq!(client.read_all_channels(3).await.unwrap().len(), 3);
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_tcp_write_then_read_back() {
    init_tracing();
    let bank = RegisterBank::with_values(0, &panel_registers());
    let (addr, _server) = start_test_server(bank.clone()).await;

    let client = tcp_client();
    client
        .connect(Endpoint::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    client.write_channel(3, true).await.unwrap();
    client.write_channel(0, false).await.unwrap();
    assert_eq!(bank.get(3), Some(0x100));
    assert_eq!(bank.get(0), Some(0x200));

    let states = client.read_channels().await.unwrap();
    assert!(states[3].is_on);
    assert!(!states[0].is_on);

    let diag = client.diagnostics();
    assert_eq!(diag.total_requests, 3);
    assert_eq!(diag.failed_requests, 0);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_tcp_device_exception_is_reported() {
    init_tracing();
    // only four registers mapped, reading twelve runs off the end
    let bank = RegisterBank::with_values(0, &[0x100, 0x200, 0x100, 0x200]);
    let (addr, _server) = start_test_server(bank).await;

    let client = tcp_client();
    client
        .connect(Endpoint::new("127.0.0.1", addr.port()))
        .await
        .unwrap();

    let err = client.read_all_channels(12).await.unwrap_err();
    assert!(
        matches!(err, ReadError::Transport(TransportError::Exception(_))),
        "unexpected error: {err:?}"
    );
    assert!(client.connection_state().is_connected());

    let states = client.read_all_channels(4).await.unwrap();
    assert_eq!(states.len(), 4);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_tcp_connection_refused() {
    init_tracing();
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = tcp_client();
    let err = client
        .connect(Endpoint::new("127.0.0.1", port))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(matches!(err, ConnectError::Transport(_)));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}
