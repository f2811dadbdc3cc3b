//! End-to-end tests of the userspace pipeline: per-CPU queues feeding the perf
//! reader, drained by the ingestion loop into a collecting sink.
//!
//! The kernel side is replaced by plain channels so these tests run without
//! privileges. Tests that attach the real probe live next to `attach` and are
//! ignored by default.

use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    sync::{broadcast, mpsc},
    time::timeout,
};
use xdpscope::{
    packet::{Packet, Transport, encode},
    source::{
        ingest::{IngestStats, IngestionLoop},
        perf::{CpuItem, PADDED_SAMPLE_SIZE, PerfBufReader, strip_sample_padding},
        reader::{ReadError, Reader},
    },
};

fn packet(cpu: u8, seq: u8) -> Packet {
    Packet::new(
        Ipv4Addr::new(10, 0, cpu, seq),
        40000 + u16::from(seq),
        Ipv4Addr::new(192, 168, 0, 1),
        443,
        Transport::Tcp,
    )
}

fn record(packet: &Packet) -> CpuItem {
    Ok(Bytes::copy_from_slice(&encode(packet)))
}

fn collecting_sink() -> (impl FnMut(Packet) + Send, Arc<Mutex<Vec<Packet>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink_seen = Arc::clone(&seen);
    (move |packet| sink_seen.lock().unwrap().push(packet), seen)
}

#[tokio::test]
async fn perf_records_reach_the_sink_in_per_cpu_order() {
    let (tx0, rx0) = mpsc::channel(16);
    let (tx1, rx1) = mpsc::channel(16);

    for seq in 0..3 {
        tx0.send(record(&packet(0, seq))).await.unwrap();
        tx1.send(record(&packet(1, seq))).await.unwrap();
    }
    // garbage on cpu 1 must be skipped, not stop the run
    tx1.send(Ok(Bytes::from_static(&[0xff; 7]))).await.unwrap();
    drop((tx0, tx1));

    let reader = Reader::from(PerfBufReader::from_queues(vec![(0, rx0), (1, rx1)]));
    let (sink, seen) = collecting_sink();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let stats = timeout(
        Duration::from_secs(1),
        IngestionLoop::new(reader, sink, shutdown_rx).run(),
    )
    .await
    .expect("loop must stop once every cpu queue is exhausted")
    .unwrap();

    assert_eq!(
        stats,
        IngestStats {
            records: 7,
            packets: 6,
            malformed: 1,
            read_errors: 0,
        }
    );

    let seen = seen.lock().unwrap();
    for cpu in 0..2u8 {
        let per_cpu: Vec<_> = seen
            .iter()
            .filter(|p| p.source.octets()[2] == cpu)
            .copied()
            .collect();
        assert_eq!(per_cpu, (0..3).map(|seq| packet(cpu, seq)).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn shutdown_stops_an_idle_perf_pipeline() {
    let (tx, rx) = mpsc::channel::<CpuItem>(4);
    tx.send(record(&packet(0, 1))).await.unwrap();

    let reader = Reader::from(PerfBufReader::from_queues(vec![(0, rx)]));
    let (sink, seen) = collecting_sink();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(IngestionLoop::new(reader, sink, shutdown_rx).run());
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(()).unwrap();

    let stats = timeout(Duration::from_secs(1), handle)
        .await
        .expect("idle pipeline must stop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(stats.packets, 1);
    assert_eq!(*seen.lock().unwrap(), vec![packet(0, 1)]);
    // the producer is still alive; the reader was closed underneath it
    assert!(tx.is_closed());
}

#[tokio::test]
async fn perf_worker_errors_do_not_stop_ingestion() {
    let (tx, rx) = mpsc::channel(4);
    tx.send(Err(ReadError::Perf {
        cpu: 0,
        message: "read_events failed".to_string(),
    }))
    .await
    .unwrap();
    tx.send(record(&packet(0, 9))).await.unwrap();
    drop(tx);

    let reader = Reader::from(PerfBufReader::from_queues(vec![(0, rx)]));
    let (sink, seen) = collecting_sink();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let stats = IngestionLoop::new(reader, sink, shutdown_rx)
        .run()
        .await
        .unwrap();

    assert_eq!(stats.read_errors, 1);
    assert_eq!(*seen.lock().unwrap(), vec![packet(0, 9)]);
}

#[test]
fn padded_perf_sample_decodes_after_stripping() {
    let expected = packet(3, 4);
    let mut sample = encode(&expected).to_vec();
    sample.resize(PADDED_SAMPLE_SIZE, 0);

    let packet = xdpscope::packet::decode(strip_sample_padding(&sample)).unwrap();
    assert_eq!(packet, expected);
}
