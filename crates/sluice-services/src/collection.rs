//! Toxic collection: the ordered toxic list of one proxy and the live
//! links built from it.
//!
//! Every edit is validated against the registry first; a rejected edit
//! leaves both the list and the links untouched. An accepted edit rebuilds
//! every live link of the affected direction before the lock is released,
//! so connections opened afterwards always see the new list.

use std::collections::HashMap;

use tokio::sync::Mutex;

use sluice_core::toxic::{chain_for, merge_attributes};
use sluice_core::{
    ActiveToxic, StreamDirection, ToxicConfig, ToxicError, ToxicPatch, ToxicRegistry,
};

use crate::link::ToxicLink;

/// Both directions of one proxied connection.
pub struct LinkPair {
    pub upstream: ToxicLink,
    pub downstream: ToxicLink,
}

impl LinkPair {
    fn link_mut(&mut self, direction: StreamDirection) -> &mut ToxicLink {
        match direction {
            StreamDirection::Upstream => &mut self.upstream,
            StreamDirection::Downstream => &mut self.downstream,
        }
    }
}

pub struct ToxicCollection {
    proxy: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    toxics: Vec<ActiveToxic>,
    links: HashMap<u64, LinkPair>,
}

impl Inner {
    async fn rebuild(&mut self, proxy: &str, directions: &[StreamDirection]) {
        let Inner { toxics, links } = self;
        let mut failed = Vec::new();
        for (id, pair) in links.iter_mut() {
            for direction in directions {
                let chain = chain_for(toxics, *direction);
                if let Err(e) = pair.link_mut(*direction).rebuild(&chain).await {
                    tracing::warn!(
                        proxy,
                        conn = id,
                        %direction,
                        error = %e,
                        "link rebuild failed, dropping connection"
                    );
                    failed.push(*id);
                    break;
                }
            }
        }
        for id in failed {
            links.remove(&id);
        }
    }
}

impl ToxicCollection {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn add(
        &self,
        config: &ToxicConfig,
        registry: &ToxicRegistry,
    ) -> Result<ActiveToxic, ToxicError> {
        let toxic = registry.instantiate(config)?;
        let mut inner = self.inner.lock().await;
        if inner.toxics.iter().any(|t| t.name == toxic.name) {
            return Err(ToxicError::Duplicate(toxic.name));
        }
        inner.toxics.push(toxic.clone());
        inner.rebuild(&self.proxy, &[toxic.stream]).await;

        tracing::info!(
            proxy = %self.proxy,
            toxic = %toxic.name,
            kind = %toxic.kind,
            stream = %toxic.stream,
            "toxic added"
        );
        Ok(toxic)
    }

    /// Merge `patch` into an existing toxic and reconfigure it in place.
    pub async fn update(
        &self,
        name: &str,
        patch: &ToxicPatch,
        registry: &ToxicRegistry,
    ) -> Result<ActiveToxic, ToxicError> {
        let mut inner = self.inner.lock().await;
        let index = inner
            .toxics
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| ToxicError::NotFound(name.to_string()))?;

        let mut config = inner.toxics[index].describe();
        if let Some(attributes) = &patch.attributes {
            config.attributes = merge_attributes(&config.attributes, attributes);
        }
        if let Some(toxicity) = patch.toxicity {
            config.toxicity = toxicity;
        }
        let updated = registry.instantiate(&config)?;
        inner.toxics[index] = updated.clone();
        inner.rebuild(&self.proxy, &[updated.stream]).await;

        tracing::info!(proxy = %self.proxy, toxic = %name, "toxic updated");
        Ok(updated)
    }

    pub async fn remove(&self, name: &str) -> Result<ActiveToxic, ToxicError> {
        let mut inner = self.inner.lock().await;
        let index = inner
            .toxics
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| ToxicError::NotFound(name.to_string()))?;
        let removed = inner.toxics.remove(index);
        inner.rebuild(&self.proxy, &[removed.stream]).await;

        tracing::info!(proxy = %self.proxy, toxic = %name, "toxic removed");
        Ok(removed)
    }

    /// Remove every toxic.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.toxics.is_empty() {
            return;
        }
        inner.toxics.clear();
        inner
            .rebuild(
                &self.proxy,
                &[StreamDirection::Upstream, StreamDirection::Downstream],
            )
            .await;
        tracing::info!(proxy = %self.proxy, "toxics reset");
    }

    pub async fn list(&self) -> Vec<ActiveToxic> {
        self.inner.lock().await.toxics.clone()
    }

    pub async fn get(&self, name: &str) -> Option<ActiveToxic> {
        self.inner
            .lock()
            .await
            .toxics
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// The toxics one direction's links run, head to tail.
    pub async fn chain(&self, direction: StreamDirection) -> Vec<ActiveToxic> {
        chain_for(&self.inner.lock().await.toxics, direction)
    }

    /// Start the links for a new connection from the current toxic list and
    /// track them under `id`. Whatever `start` returns besides the pair is
    /// handed back to the caller.
    pub async fn attach<T>(
        &self,
        id: u64,
        start: impl FnOnce(&[ActiveToxic]) -> (LinkPair, T),
    ) -> T {
        let mut inner = self.inner.lock().await;
        let (pair, extra) = start(&inner.toxics);
        inner.links.insert(id, pair);
        extra
    }

    /// Stop tracking a finished connection.
    pub async fn detach(&self, id: u64) {
        self.inner.lock().await.links.remove(&id);
    }

    pub async fn connections(&self) -> usize {
        self.inner.lock().await.links.len()
    }
}
