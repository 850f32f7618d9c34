//! HTTPS Transport
//!
//! Posts each payload straight to the remote API.

use async_trait::async_trait;
use std::sync::Arc;

use super::{Transport, TransportContext};
use crate::error::{AgentError, AgentResult};
use crate::remote::RemoteApi;

#[derive(Default)]
pub struct HttpsTransport {
    target: Option<(Arc<dyn RemoteApi>, String)>,
}

impl HttpsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    fn name(&self) -> &'static str {
        "https"
    }

    async fn start(&mut self, ctx: &TransportContext) -> AgentResult<()> {
        if !ctx.identity.is_complete() {
            return Err(AgentError::SinkUnavailable("device is not registered".to_string()));
        }
        self.target = Some((Arc::clone(&ctx.api), ctx.identity.installation_id.clone()));
        Ok(())
    }

    async fn deliver(&self, payload: &[u8]) -> AgentResult<()> {
        let (api, installation_id) = self
            .target
            .as_ref()
            .ok_or_else(|| AgentError::SinkUnavailable("HTTPS transport is not started".to_string()))?;

        api.post_event(installation_id, payload).await
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::scheduler::Scheduler;
    use crate::testing::FakeApi;

    #[test]
    fn test_posts_to_installation() {
        let scheduler = Arc::new(Scheduler::new(1).unwrap());
        let api = Arc::new(FakeApi::with_limit(0));
        let ctx = TransportContext {
            identity: Identity {
                organization: "org".to_string(),
                client_id: "client".to_string(),
                installation_id: "install-9".to_string(),
                client_secret: "secret".to_string(),
            },
            api: api.clone(),
            scheduler: Arc::clone(&scheduler),
        };

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let mut transport = HttpsTransport::new();
            transport.start(&ctx).await.unwrap();
            transport.deliver(b"packed").await.unwrap();
        });

        assert_eq!(api.posted(), vec![("install-9".to_string(), b"packed".to_vec())]);
    }
}
