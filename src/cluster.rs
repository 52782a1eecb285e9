// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Kubernetes API access for cluster previews and diffs

use crate::config::ClusterContext;
use crate::error::{EngineError, Result};
use crate::kinds::{KindHandler, KindRegistry};
use crate::types::Resource;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Live cluster operations the engine relies on
pub trait ClusterClient: Send + Sync {
    /// Every object of every registered kind, as multi-document YAML
    fn list_resources(&self, context: &str, registry: &KindRegistry) -> Result<String>;

    /// Delete one object
    fn delete_resource(&self, context: &str, resource: &Resource, handler: &dyn KindHandler) -> Result<()>;
}

/// Client for the Kubernetes REST API
#[derive(Debug, Clone)]
pub struct KubeApiClient {
    contexts: BTreeMap<String, ClusterContext>,
    timeout: Duration,
}

impl KubeApiClient {
    /// Client over the configured contexts
    #[must_use]
    pub fn new(contexts: BTreeMap<String, ClusterContext>) -> Self {
        Self {
            contexts,
            timeout: Duration::from_secs(30),
        }
    }

    fn context(&self, name: &str) -> Result<&ClusterContext> {
        self.contexts
            .get(name)
            .ok_or_else(|| EngineError::Cluster(format!("unknown cluster context: {name}")))
    }

    fn http(&self, context: &ClusterContext) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(context.insecure)
            .build()
            .map_err(|e| EngineError::Cluster(e.to_string()))
    }

    fn request(
        client: &Client,
        method: reqwest::Method,
        context: &ClusterContext,
        path: &str,
    ) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}{path}", context.server.trim_end_matches('/'));
        let mut req = client.request(method, url);
        if let Some(token) = &context.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

/// Turn a list response into documents, dropping server-managed fields
pub fn list_items_to_yaml(body: &JsonValue, handler: &dyn KindHandler) -> Result<Vec<String>> {
    let Some(items) = body.get("items").and_then(JsonValue::as_array) else {
        return Ok(Vec::new());
    };
    let mut docs = Vec::with_capacity(items.len());
    for item in items {
        let mut item = item.clone();
        if let Some(obj) = item.as_object_mut() {
            obj.remove("status");
            obj.insert("kind".into(), JsonValue::String(handler.kind().to_string()));
            obj.insert(
                "apiVersion".into(),
                JsonValue::String(handler.api_version().to_string()),
            );
            if let Some(meta) = obj.get_mut("metadata").and_then(JsonValue::as_object_mut) {
                meta.remove("managedFields");
            }
        }
        docs.push(serde_yaml::to_string(&item)?);
    }
    Ok(docs)
}

impl ClusterClient for KubeApiClient {
    fn list_resources(&self, context_name: &str, registry: &KindRegistry) -> Result<String> {
        let context = self.context(context_name)?;
        let client = self.http(context)?;
        info!("Listing resources in cluster context {context_name}");

        let mut docs = Vec::new();
        for handler in registry.handlers() {
            let Some(path) = handler.api_path(context.namespace.as_deref()) else {
                continue;
            };
            let resp = Self::request(&client, reqwest::Method::GET, context, &path)
                .send()
                .map_err(|e| EngineError::Cluster(format!("GET {path}: {e}")))?;
            match resp.status() {
                status if status.is_success() => {
                    let body: JsonValue = resp
                        .json()
                        .map_err(|e| EngineError::Cluster(format!("GET {path}: {e}")))?;
                    docs.extend(list_items_to_yaml(&body, handler.as_ref())?);
                }
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => {
                    debug!("Skipping {} ({})", handler.kind(), resp.status());
                }
                status => {
                    return Err(EngineError::Cluster(format!("GET {path}: HTTP {status}")));
                }
            }
        }
        info!("Fetched {} objects from {context_name}", docs.len());
        Ok(docs.join("---\n"))
    }

    fn delete_resource(&self, context_name: &str, resource: &Resource, handler: &dyn KindHandler) -> Result<()> {
        let context = self.context(context_name)?;
        let namespace = resource.namespace.as_deref().or(context.namespace.as_deref()).unwrap_or("default");
        let collection = handler.api_path(Some(namespace)).ok_or_else(|| {
            EngineError::Cluster(format!("{} cannot be deleted from a cluster", handler.kind()))
        })?;
        let path = format!("{collection}/{}", resource.name);
        let client = self.http(context)?;
        let resp = Self::request(&client, reqwest::Method::DELETE, context, &path)
            .send()
            .map_err(|e| EngineError::Cluster(format!("DELETE {path}: {e}")))?;
        if !resp.status().is_success() {
            warn!("DELETE {path} returned {}", resp.status());
            return Err(EngineError::Cluster(format!("DELETE {path}: HTTP {}", resp.status())));
        }
        info!("Deleted {} {} from {context_name}", handler.kind(), resource.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_items_strip_server_fields() {
        let registry = KindRegistry::builtin();
        let handler = registry.get("ConfigMap").unwrap();
        let body = serde_json::json!({
            "kind": "ConfigMapList",
            "items": [{
                "metadata": {"name": "cfg", "namespace": "apps", "managedFields": [{"manager": "kubectl"}]},
                "data": {"a": "b"},
                "status": {}
            }]
        });

        let docs = list_items_to_yaml(&body, handler.as_ref()).unwrap();

        assert_eq!(docs.len(), 1);
        assert!(docs[0].contains("kind: ConfigMap"));
        assert!(docs[0].contains("apiVersion: v1"));
        assert!(!docs[0].contains("managedFields"));
        assert!(!docs[0].contains("status"));
    }

    #[test]
    fn test_unknown_context_is_cluster_error() {
        let client = KubeApiClient::new(BTreeMap::new());
        let err = client
            .list_resources("missing", &KindRegistry::builtin())
            .unwrap_err();
        assert!(matches!(err, EngineError::Cluster(_)));
    }
}
