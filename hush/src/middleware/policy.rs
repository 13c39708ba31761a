use async_trait::async_trait;
use bytes::Bytes;
use hush_audit::{AuditEvent, AuditSink, Surface};
use hush_context::{DnsMiddleware, DnsRequestCtx};
use hush_dns::{DnsMessage, DnsMessageBuilder, DnsRecord, DnsResponseCode, RecordType};
use hush_rules::Classification;

use crate::{
    config::{NonAddressAnswer, SinkholeConfig},
    global::Global,
    local::Local,
};

/// Answers blocked names with the sinkhole address; everything else passes through.
pub struct PolicyMiddleware;

#[async_trait]
impl DnsMiddleware<Global, Local> for PolicyMiddleware {
    async fn on_query(&self, ctx: &DnsRequestCtx<Global, Local>) -> anyhow::Result<Option<Bytes>> {
        let message = ctx.message();
        let Some(question) = message.question() else {
            return Ok(None);
        };

        let global = ctx.global();
        let snapshot = global.rules.current();
        let classification = snapshot.index.classify_name(&question.qname);

        let blocked = match classification {
            Classification::Blocked => true,
            Classification::Allowed => false,
            Classification::Unknown => snapshot.index.allow_only(),
        };
        drop(snapshot);

        if !blocked {
            if classification == Classification::Allowed {
                global.audit.emit(AuditEvent::Allowed {
                    domain: question.qname.to_string(),
                    qtype: Some(question.qtype.to_u16()),
                    client: Some(ctx.client().ip()),
                });
            }
            return Ok(None);
        }

        tracing::debug!(qname = %question.qname, qtype = ?question.qtype, "blocked");
        ctx.local_mut().blocked = true;

        global.audit.emit(AuditEvent::Blocked {
            domain: question.qname.to_string(),
            surface: Surface::Dns,
            qtype: Some(question.qtype.to_u16()),
            client: Some(ctx.client().ip()),
        });

        Ok(Some(sinkhole_response(message, &global.sinkhole, global.max_ttl)?))
    }
}

/// Synthesized answer for a blocked query. Never forwarded upstream.
pub fn sinkhole_response(query: &DnsMessage, sinkhole: &SinkholeConfig, max_ttl: u32) -> anyhow::Result<Bytes> {
    let question = query
        .question()
        .ok_or_else(|| anyhow::anyhow!("no question in message"))?;
    let ttl = sinkhole.ttl_secs.min(max_ttl);
    let name = question.qname.clone();

    let builder = DnsMessageBuilder::response_to(query);
    let builder = match question.qtype {
        RecordType::A => builder
            .add_answer(DnsRecord::a(name, ttl, sinkhole.ipv4))
            .with_response(DnsResponseCode::NoError),
        RecordType::AAAA => builder
            .add_answer(DnsRecord::aaaa(name, ttl, sinkhole.ipv6))
            .with_response(DnsResponseCode::NoError),
        _ => match sinkhole.non_address {
            NonAddressAnswer::NoData => builder.with_response(DnsResponseCode::NoError),
            NonAddressAnswer::NxDomain => builder.with_response(DnsResponseCode::NxDomain),
        },
    };

    builder.build().encode()
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod policy_tests;
