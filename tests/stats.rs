use std::time::Duration;

use crossbeam_utils::thread::scope;
use kvs::{ServerStats, StatsSnapshot};

#[test]
fn empty_stats_report_no_data() {
    let snapshot = ServerStats::new().snapshot();
    assert_eq!(snapshot, StatsSnapshot::default());
    assert_eq!(snapshot.average_waiting_us(), None);
    assert_eq!(snapshot.average_service_us(), None);

    let report = snapshot.to_string();
    assert!(report.contains("completed-requests: 0"));
    assert!(report.contains("no data"));
}

#[test]
fn averages_are_arithmetic_means() {
    let stats = ServerStats::new();
    let samples = [(10u64, 100u64), (20, 200), (60, 30)];
    for (waiting, service) in samples {
        stats.record(Duration::from_micros(waiting), Duration::from_micros(service));
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.total_waiting, Duration::from_micros(90));
    assert_eq!(snapshot.total_service, Duration::from_micros(330));
    assert!((snapshot.average_waiting_us().unwrap() - 30.0).abs() < 1e-6);
    assert!((snapshot.average_service_us().unwrap() - 110.0).abs() < 1e-6);

    let report = snapshot.to_string();
    assert!(report.contains("avg-waiting-time: 30.000 usecs"));
    assert!(report.contains("avg-service-time: 110.000 usecs"));
}

#[test]
fn concurrent_records_are_never_lost() {
    let stats = ServerStats::new();
    scope(|s| {
        for _ in 0..8 {
            s.spawn(|_| {
                for _ in 0..1000 {
                    stats.record(Duration::from_micros(1), Duration::from_micros(2));
                }
            });
        }
    })
    .unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.completed, 8000);
    assert_eq!(snapshot.total_waiting, Duration::from_micros(8000));
    assert_eq!(snapshot.total_service, Duration::from_micros(16000));
}
