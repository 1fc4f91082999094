use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rovlink::config::VehicleConfig;
use rovlink::server::DispatchServer;
use rovlink::store::{Scalar, Snapshot, Store};
use rovlink::topology::{Partition, PeripheralId, Topology, ACTUATOR_IDLE};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::sleep;

const THRUSTERS: Partition = Partition::Peripheral(PeripheralId::Thrusters);

/// Bind a dispatch server on a loopback ephemeral port with no serial
/// links and hand back the shared store.
async fn start_server() -> (Arc<Store>, SocketAddr) {
    let store = Arc::new(Store::new(Topology::vehicle()));
    let config = VehicleConfig {
        bind_addr: "127.0.0.1:0".into(),
        serial: Vec::new(),
    };
    let server = DispatchServer::start(Arc::clone(&store), &config)
        .await
        .expect("bind loopback listener");
    let addr = server.local_addr().expect("listener address");
    tokio::spawn(server.serve());
    (store, addr)
}

async fn connect(addr: SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect to server");
    let (read_half, write_half) = stream.into_split();
    (BufReader::new(read_half), write_half)
}

async fn exchange(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    frame: &str,
) -> Snapshot {
    writer.write_all(frame.as_bytes()).await.expect("send frame");
    writer.write_all(b"\n").await.expect("send newline");
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read reply");
    serde_json::from_str(line.trim()).expect("reply is a snapshot")
}

#[tokio::test]
async fn exchange_applies_commands_and_returns_surface_snapshot() {
    let (store, addr) = start_server().await;

    // Telemetry previously reported by a peripheral.
    store.set(THRUSTERS, "Sen_IMU_X", Scalar::Float(0.5));

    let (mut reader, mut writer) = connect(addr).await;
    let reply = exchange(&mut reader, &mut writer, r#"{"Thr_FP": 1800}"#).await;

    assert_eq!(reply["Sen_IMU_X"], Scalar::Float(0.5));
    // First write for the actuator is accepted at full magnitude.
    assert_eq!(store.get(THRUSTERS, "Thr_FP"), Some(Scalar::Int(1800)));
}

#[tokio::test]
async fn repeated_commands_ramp_toward_target() {
    let (store, addr) = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;

    exchange(&mut reader, &mut writer, r#"{"Thr_FP": 1500}"#).await;
    for _ in 0..3 {
        exchange(&mut reader, &mut writer, r#"{"Thr_FP": 1800}"#).await;
    }
    assert_eq!(store.get(THRUSTERS, "Thr_FP"), Some(Scalar::Int(1506)));
}

#[tokio::test]
async fn malformed_control_frame_keeps_the_session_alive() {
    let (store, addr) = start_server().await;
    let (mut reader, mut writer) = connect(addr).await;

    // Garbage is dropped but still answered with a snapshot.
    let reply = exchange(&mut reader, &mut writer, "definitely not json").await;
    assert!(reply.is_empty());

    // Same connection keeps working.
    exchange(&mut reader, &mut writer, r#"{"Thr_AP": 1650}"#).await;
    assert_eq!(store.get(THRUSTERS, "Thr_AP"), Some(Scalar::Int(1650)));
}

#[tokio::test]
async fn disconnect_runs_failsafe_and_server_reaccepts() {
    let (store, addr) = start_server().await;

    {
        let (mut reader, mut writer) = connect(addr).await;
        exchange(&mut reader, &mut writer, r#"{"Thr_FP": 1700, "Thr_M": 1300}"#).await;
        // Connection halves drop here: the station is gone mid-cycle.
    }

    // The server notices the close, resets the actuators and goes back to
    // listening.
    let mut reset = false;
    for _ in 0..40 {
        sleep(Duration::from_millis(50)).await;
        if store.get(THRUSTERS, "Thr_FP") == Some(Scalar::Int(ACTUATOR_IDLE)) {
            reset = true;
            break;
        }
    }
    assert!(reset, "fail-safe default reset never ran");
    assert_eq!(
        store.get(Partition::Peripheral(PeripheralId::Micro), "Thr_M"),
        Some(Scalar::Int(ACTUATOR_IDLE))
    );

    // Re-accept: a new station connects and exchanges within one cycle.
    let (mut reader, mut writer) = connect(addr).await;
    let reply = exchange(&mut reader, &mut writer, r#"{"Thr_FS": 1600}"#).await;
    assert!(reply.is_empty() || !reply.contains_key("Thr_FS"));
    assert_eq!(store.get(THRUSTERS, "Thr_FS"), Some(Scalar::Int(1600)));
}

#[tokio::test]
async fn surface_connection_round_trip_against_live_server() {
    use rovlink::surface::Connection;

    let (vehicle_store, addr) = start_server().await;
    vehicle_store.set(THRUSTERS, "Sen_Dep_Dep", Scalar::Float(12.5));

    let surface_store = Arc::new(Store::new(Topology::surface()));
    surface_store.set(Partition::Surface, "Thr_FP", Scalar::Int(1600));
    tokio::spawn(Connection::new(Arc::clone(&surface_store), addr.to_string()).run());

    // The uplink value reaches the vehicle and telemetry flows back down.
    let mut synced = false;
    for _ in 0..40 {
        sleep(Duration::from_millis(50)).await;
        let uplinked = vehicle_store.get(THRUSTERS, "Thr_FP") == Some(Scalar::Int(1600));
        let downlinked =
            surface_store.get(Partition::Surface, "Sen_Dep_Dep") == Some(Scalar::Float(12.5));
        if uplinked && downlinked {
            synced = true;
            break;
        }
    }
    assert!(synced, "surface and vehicle stores never converged");
}
