use hush_audit::{MemorySink, Surface};

use super::*;

fn blocked(domain: &str) -> AuditEvent {
    AuditEvent::Blocked {
        domain: domain.to_string(),
        surface: Surface::Dns,
        qtype: Some(1),
        client: None,
    }
}

#[test]
fn test_live_stats_apply() {
    let mut stats = LiveStats::default();

    stats.apply_query(false, false);
    stats.apply_query(true, false);
    stats.apply_query(false, true);
    stats.apply_error();

    assert_eq!(
        stats,
        LiveStats {
            total: 4,
            blocked: 1,
            cached: 1,
            errors: 1,
        }
    );
}

#[tokio::test]
async fn test_service_forwards_events_and_counts() {
    let sink = Arc::new(MemorySink::new());
    let (handle, stats, service) = AuditService::new(sink.clone(), 16, Duration::from_secs(60));
    let task = tokio::spawn(service.run());

    handle.emit(blocked("ads.example.com"));
    handle.query(true, false);
    handle.query(false, true);
    handle.error();
    handle.shutdown();

    task.await.unwrap().unwrap();

    assert_eq!(sink.events(), vec![blocked("ads.example.com")]);
    assert_eq!(
        stats.live().await,
        LiveStats {
            total: 3,
            blocked: 1,
            cached: 1,
            errors: 1,
        }
    );
}

#[tokio::test]
async fn test_full_channel_drops_instead_of_blocking() {
    let sink = Arc::new(MemorySink::new());
    let (handle, _stats, service) = AuditService::new(sink.clone(), 1, Duration::from_secs(60));

    // Nothing is draining the channel yet.
    handle.emit(blocked("a.example.com"));
    handle.emit(blocked("b.example.com"));

    let task = tokio::spawn(service.run());
    handle.shutdown();
    drop(handle);
    task.await.unwrap().unwrap();

    assert_eq!(sink.events(), vec![blocked("a.example.com")]);
}

#[tokio::test]
async fn test_closing_all_handles_stops_service() {
    let (handle, _stats, service) = AuditService::new(Arc::new(MemorySink::new()), 4, Duration::from_secs(60));
    let task = tokio::spawn(service.run());

    drop(handle);

    task.await.unwrap().unwrap();
}
