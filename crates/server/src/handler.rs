use std::net::SocketAddr;

use bytes::Bytes;
use hush_context::{DnsRequestCtx, RequestType};
use hush_dns::{DnsMessage, DnsMessageBuilder, DnsOpcode, DnsResponseCode};
use hush_resolver::ResolveError;

use crate::ServerState;

/// Extra time the resolver gets past the request deadline before the listener gives up on it.
const RESOLVE_GRACE: std::time::Duration = std::time::Duration::from_millis(50);

/// A query that produced a reply. Callbacks run through [`Handled::finish`] once the
/// reply has been written.
pub(crate) struct Handled<G, L> {
    pub ctx: DnsRequestCtx<G, L>,
    pub response: Bytes,
    outcome: Result<(), ResolveError>,
}

impl<G, L> Handled<G, L> {
    pub async fn finish(self, state: &ServerState<G, L>) {
        match &self.outcome {
            Ok(()) => {
                if let Some(cb) = &state.on_success {
                    if let Err(e) = cb(&self.ctx, &self.response).await {
                        tracing::warn!("success callback failed: {e:#}");
                    }
                }
            }
            Err(err) => {
                if let Some(cb) = &state.on_error {
                    let _ = cb(&self.ctx, err).await;
                }
            }
        }
    }
}

/// Decode and answer one raw query. `None` means the packet is dropped without a reply.
pub(crate) async fn handle_query<G, L>(
    state: &ServerState<G, L>,
    request_type: RequestType,
    client: SocketAddr,
    raw: Bytes,
) -> Option<Handled<G, L>>
where
    G: Send + Sync + 'static,
    L: Default + Send + Sync + 'static,
{
    let message = match DnsMessage::decode(&raw) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(client = %client, "dropping malformed packet: {e:#}");
            return None;
        }
    };

    if message.flags.response {
        tracing::debug!(client = %client, "dropping unsolicited response");
        return None;
    }

    if message.questions().len() != 1 {
        tracing::debug!(
            client = %client,
            questions = message.questions().len(),
            "dropping query with bad question count"
        );
        return None;
    }

    if message.flags.opcode != DnsOpcode::Query {
        let response = error_response(&message, DnsResponseCode::NotImp)?;
        let ctx = DnsRequestCtx::new(
            state.timeout,
            request_type,
            client,
            raw,
            message,
            state.global.clone(),
            L::default(),
        );
        return Some(Handled {
            ctx,
            response,
            outcome: Err(ResolveError::InvalidRequest("unsupported opcode".into())),
        });
    }

    let ctx = DnsRequestCtx::new(
        state.timeout,
        request_type,
        client,
        raw,
        message,
        state.global.clone(),
        L::default(),
    );

    match hush_context::run_middlewares(&state.middlewares, &ctx).await {
        Ok(Some(response)) => {
            return Some(Handled {
                ctx,
                response,
                outcome: Ok(()),
            });
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(client = %client, "middleware failed, falling back to resolver: {e:#}"),
    }

    let resolved = tokio::time::timeout_at(ctx.deadline() + RESOLVE_GRACE, state.resolver.resolve(&ctx))
        .await
        .unwrap_or(Err(ResolveError::Timeout));

    match resolved {
        Ok(response) => Some(Handled {
            ctx,
            response,
            outcome: Ok(()),
        }),
        Err(e) => {
            tracing::debug!(client = %client, "query failed: {e}");
            let response = error_response(ctx.message(), e.response_code())?;
            Some(Handled {
                ctx,
                response,
                outcome: Err(e),
            })
        }
    }
}

/// A response to `query` carrying only the question and `rcode`.
pub(crate) fn error_response(query: &DnsMessage, rcode: DnsResponseCode) -> Option<Bytes> {
    DnsMessageBuilder::response_to(query)
        .with_response(rcode)
        .build()
        .encode()
        .map_err(|e| tracing::warn!("failed to encode error response: {e:#}"))
        .ok()
}

/// An empty response with TC set, telling the client to retry over TCP.
pub(crate) fn truncated_response(query: &DnsMessage, full: &[u8]) -> Option<Bytes> {
    let rcode = DnsMessage::decode(full)
        .map(|m| m.response_code())
        .unwrap_or(DnsResponseCode::NoError);

    let mut message = DnsMessageBuilder::response_to(query).with_response(rcode).build();
    message.flags.truncated = true;

    message
        .encode()
        .map_err(|e| tracing::warn!("failed to encode truncated response: {e:#}"))
        .ok()
}
