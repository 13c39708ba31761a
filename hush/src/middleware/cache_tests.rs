use std::{
    net::{Ipv4Addr, Ipv6Addr},
    sync::Arc,
    time::Duration,
};

use hush_audit::NullSink;
use hush_cache::{DnsCache, DnsCacheConfig};
use hush_context::RequestType;
use hush_dns::{ClassType, DnsMessage, DnsQuestion, DnsRecord, DnsRecordData, DnsResponseCode, DomainName, RecordType};
use hush_rules::RuleStore;

use super::*;
use crate::{
    audit::AuditService,
    config::{NonAddressAnswer, SinkholeConfig},
};

fn name(s: &str) -> DomainName {
    DomainName::from_ascii(s).unwrap()
}

fn query(id: u16, qname: &str) -> DnsMessage {
    DnsMessageBuilder::new()
        .with_id(id)
        .add_question(DnsQuestion::new(name(qname), RecordType::A, ClassType::IN))
        .build()
}

fn soa(ttl: u32, minimum: u32) -> DnsRecord {
    DnsRecord::new(
        name("example.com"),
        RecordType::SOA,
        ClassType::IN,
        ttl,
        DnsRecordData::Soa {
            mname: name("ns.example.com"),
            rname: name("hostmaster.example.com"),
            serial: 7,
            refresh: 3600,
            retry: 600,
            expire: 86400,
            minimum,
        },
    )
}

fn global(max_ttl: u64) -> Arc<Global> {
    let (audit, _stats, _service) = AuditService::new(Arc::new(NullSink), 16, Duration::from_secs(60));

    Arc::new(Global {
        cache: DnsCache::new(DnsCacheConfig {
            max_entries: 16,
            max_ttl: Duration::from_secs(max_ttl),
        }),
        rules: Arc::new(RuleStore::default()),
        audit,
        sinkhole: SinkholeConfig {
            ipv4: Ipv4Addr::LOCALHOST,
            ipv6: Ipv6Addr::LOCALHOST,
            ttl_secs: 10,
            non_address: NonAddressAnswer::NoData,
        },
        max_ttl: max_ttl as u32,
    })
}

fn ctx(global: &Arc<Global>, message: DnsMessage) -> DnsRequestCtx<Global, Local> {
    DnsRequestCtx::new(
        Duration::from_secs(1),
        RequestType::UDP,
        "192.0.2.20:5300".parse().unwrap(),
        message.encode().unwrap(),
        message,
        global.clone(),
        Local::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_miss_passes_through() {
    let global = global(3600);
    let ctx = ctx(&global, query(1, "example.com"));

    assert!(CacheMiddleware.on_query(&ctx).await.unwrap().is_none());
    assert!(!ctx.local().cache_hit);
}

#[tokio::test(start_paused = true)]
async fn test_hit_answers_with_request_id_and_capped_ttl() {
    let global = global(300);
    let stored = query(1, "example.com");
    let upstream = DnsMessageBuilder::response_to(&stored)
        .add_answer(DnsRecord::a(name("example.com"), 86_400, Ipv4Addr::new(192, 0, 2, 1)))
        .with_response(DnsResponseCode::NoError)
        .build();
    assert!(global.cache.insert(&stored, &upstream));

    tokio::time::advance(Duration::from_secs(100)).await;

    let ctx = ctx(&global, query(0xBEEF, "example.com"));
    let resp = CacheMiddleware.on_query(&ctx).await.unwrap().unwrap();
    let resp = DnsMessage::decode(&resp).unwrap();

    assert!(ctx.local().cache_hit);
    assert!(!ctx.local().cacheable());
    assert_eq!(resp.id, 0xBEEF);
    assert!(resp.flags.response);
    assert_eq!(resp.response_code(), DnsResponseCode::NoError);
    assert_eq!(resp.question().unwrap().qname, name("example.com"));
    assert_eq!(resp.answers().len(), 1);
    assert_eq!(resp.answers()[0].data, DnsRecordData::Ipv4(Ipv4Addr::new(192, 0, 2, 1)));
    assert_eq!(resp.answers()[0].ttl, 200);
}

#[tokio::test(start_paused = true)]
async fn test_negative_hit_keeps_rcode_and_soa() {
    let global = global(3600);
    let stored = query(1, "missing.example.com");
    let upstream = DnsMessageBuilder::response_to(&stored)
        .add_authority_record(soa(900, 60))
        .with_response(DnsResponseCode::NxDomain)
        .build();
    assert!(global.cache.insert(&stored, &upstream));

    let ctx = ctx(&global, query(2, "missing.example.com"));
    let resp = DnsMessage::decode(&CacheMiddleware.on_query(&ctx).await.unwrap().unwrap()).unwrap();

    assert!(ctx.local().cache_hit);
    assert_eq!(resp.id, 2);
    assert_eq!(resp.response_code(), DnsResponseCode::NxDomain);
    assert!(resp.answers().is_empty());
    assert_eq!(resp.authority_records().len(), 1);
    assert_eq!(resp.authority_records()[0].record_type, RecordType::SOA);
    assert_eq!(resp.authority_records()[0].ttl, 60);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_not_served() {
    let global = global(3600);
    let stored = query(1, "missing.example.com");
    let upstream = DnsMessageBuilder::response_to(&stored)
        .add_authority_record(soa(900, 60))
        .with_response(DnsResponseCode::NxDomain)
        .build();
    assert!(global.cache.insert(&stored, &upstream));

    tokio::time::advance(Duration::from_secs(61)).await;

    let ctx = ctx(&global, query(3, "missing.example.com"));
    assert!(CacheMiddleware.on_query(&ctx).await.unwrap().is_none());
    assert!(!ctx.local().cache_hit);
}
