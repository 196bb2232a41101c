//! Integration tests for sliding-window admission control

use std::sync::Arc;
use std::time::{Duration, Instant};

use dawnbell::ratelimit::{
    client_identifier, fallback_admission, Admission, LimitWindow, RateLimitConfig,
    RateLimitRule, RateLimiter,
};

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

#[test]
fn test_burst_window_math() {
    let limiter = RateLimiter::new(RateLimitRule::new(3, 100, 1000));
    let t0 = Instant::now();

    for i in 0..3 {
        let admission = limiter.admit_at("client", "/wake", t0 + secs(i)).unwrap();
        assert!(admission.is_allowed(), "request {i} should pass");
    }

    let fourth = limiter.admit_at("client", "/wake", t0 + secs(3)).unwrap();
    match &fourth {
        Admission::Limited {
            window,
            limit,
            retry_after,
        } => {
            assert_eq!(*window, LimitWindow::Burst);
            assert_eq!(*limit, 3);
            assert_eq!(*retry_after, secs(7));
        }
        Admission::Allowed => panic!("fourth request inside 10s must be limited"),
    }
    assert!(fourth.reason().unwrap().contains("per 10 seconds"));

    let later = limiter.admit_at("client", "/wake", t0 + secs(11)).unwrap();
    assert!(later.is_allowed());
}

#[test]
fn test_hour_window_rejects_after_minute_windows_clear() {
    let limiter = RateLimiter::new(RateLimitRule::new(100, 100, 5));
    let t0 = Instant::now();

    for i in 0..5 {
        assert!(limiter
            .admit_at("client", "/api/broadcast_status", t0 + secs(i * 120))
            .unwrap()
            .is_allowed());
    }

    let limited = limiter
        .admit_at("client", "/api/broadcast_status", t0 + secs(900))
        .unwrap();
    assert!(matches!(
        limited,
        Admission::Limited {
            window: LimitWindow::Hour,
            ..
        }
    ));
    assert!(limited.reason().unwrap().contains("per hour"));
}

#[test]
fn test_configured_endpoint_rules() {
    let limiter = RateLimiter::from_config(&RateLimitConfig::default());
    let t0 = Instant::now();

    // Admin rule: burst of 3
    for i in 0..3 {
        assert!(limiter
            .admit_at("operator", "/api/manual_broadcast", t0 + Duration::from_millis(i))
            .unwrap()
            .is_allowed());
    }
    assert!(!limiter
        .admit_at("operator", "/api/manual_broadcast", t0 + Duration::from_millis(5))
        .unwrap()
        .is_allowed());

    // Same client, default rule still has room
    assert!(limiter
        .admit_at("operator", "/wake", t0 + Duration::from_millis(6))
        .unwrap()
        .is_allowed());

    assert_eq!(limiter.rule_for("/api/scheduler_status"), RateLimitRule::scheduler());
    assert_eq!(limiter.rule_for("/hooks/webhook"), RateLimitRule::webhook());
}

#[test]
fn test_concurrent_clients_share_one_limiter() {
    let limiter = Arc::new(RateLimiter::new(RateLimitRule::new(10, 60, 1000)));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let limiter = Arc::clone(&limiter);
            std::thread::spawn(move || {
                (0..20)
                    .filter(|_| limiter.admit(&format!("client-{i}"), "/wake").unwrap().is_allowed())
                    .count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 10);
    }
    assert_eq!(limiter.tracked_clients(), 8);
}

#[test]
fn test_sweep_drops_idle_clients() {
    let limiter = RateLimiter::default();
    let t0 = Instant::now();

    limiter.admit_at("idle", "/wake", t0).unwrap();
    limiter.admit_at("active", "/wake", t0 + secs(3000)).unwrap();

    let removed = limiter.sweep_inactive_at(t0 + secs(3700)).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(limiter.tracked_clients(), 1);
}

#[test]
fn test_fallback_policy() {
    assert!(fallback_admission("GET"));
    assert!(fallback_admission("HEAD"));
    assert!(!fallback_admission("POST"));
    assert!(!fallback_admission("DELETE"));
}

#[test]
fn test_client_identifier_sources() {
    let forwarded = client_identifier(Some("198.51.100.4, 10.0.0.2"), Some("10.9.9.9"), None, None);
    assert!(forwarded.starts_with("198.51.100.4:"));

    let real_ip = client_identifier(None, Some("10.9.9.9"), None, Some("curl/8"));
    assert!(real_ip.starts_with("10.9.9.9:"));

    let peer = client_identifier(None, None, Some("127.0.0.1:4000".parse().unwrap()), None);
    assert_eq!(peer, "127.0.0.1:none");

    // Different agents from one address are tracked separately
    let a = client_identifier(Some("203.0.113.1"), None, None, Some("agent-a"));
    let b = client_identifier(Some("203.0.113.1"), None, None, Some("agent-b"));
    assert_ne!(a, b);
}
