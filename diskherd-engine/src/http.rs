use async_trait::async_trait;
use diskherd_core::{
    AttachmentDef, Disk, DiskAttachment, DiskDef, EngineConfig, HerdError, Result, StorageDomain,
    TransferSession, Vm,
};
use reqwest::{Certificate, Method, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// JSON client for the engine's REST API. One instance is owned by each
/// reconciliation run and dropped, without logging anything out, when the
/// run ends.
pub struct HttpEngine {
    base: Url,
    client: reqwest::Client,
    auth: Option<(String, String)>,
}

impl HttpEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if config.insecure {
            builder = builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
        } else if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file)?;
            let cert = Certificate::from_pem(&pem).map_err(|e| {
                HerdError::Config(format!("invalid CA file {}: {e}", ca_file.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let client = builder
            .build()
            .map_err(|e| HerdError::Config(format!("failed to build HTTP client: {e}")))?;
        let mut base = Url::parse(&config.url)
            .map_err(|e| HerdError::Config(format!("invalid engine URL '{}': {e}", config.url)))?;
        // Url::join drops the last path segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let auth = match (&config.username, &config.password) {
            (Some(user), password) => Some((user.clone(), password.clone().unwrap_or_default())),
            _ => None,
        };

        Ok(Self { base, client, auth })
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .base
            .join(path)
            .map_err(|e| HerdError::Config(format!("invalid API path '{path}': {e}")))?;
        debug!("{method} {url}");
        let mut builder = self.client.request(method, url);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, Some(password));
        }
        Ok(builder)
    }

    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<Response> {
        let response = builder.send().await.map_err(|e| HerdError::Network {
            operation: operation.to_string(),
            cause: e.to_string(),
        })?;
        self.check(operation, response).await
    }

    async fn check(&self, operation: &str, response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(HerdError::RemoteOperation {
            operation: operation.to_string(),
            message: format!("HTTP {status}: {body}"),
        })
    }

    async fn json_of<T: DeserializeOwned>(&self, operation: &str, response: Response) -> Result<T> {
        response.json().await.map_err(|e| HerdError::Network {
            operation: operation.to_string(),
            cause: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let response = self.send(operation, self.request(Method::GET, path)?).await?;
        self.json_of(operation, response).await
    }

    /// GET where a 404 means "does not exist" rather than a failure.
    async fn get_json_opt<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<Option<T>> {
        let response = self
            .request(Method::GET, path)?
            .send()
            .await
            .map_err(|e| HerdError::Network {
                operation: operation.to_string(),
                cause: e.to_string(),
            })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(operation, response).await?;
        Ok(Some(self.json_of(operation, response).await?))
    }

    async fn search<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        name: &str,
    ) -> Result<Option<T>> {
        let response = self
            .send(
                operation,
                self.request(Method::GET, path)?
                    .query(&[("search", format!("name={name}"))]),
            )
            .await?;
        let mut matches: Vec<T> = self.json_of(operation, response).await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.remove(0))
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .send(operation, self.request(Method::POST, path)?.json(body))
            .await?;
        self.json_of(operation, response).await
    }

    async fn post_action<B: Serialize>(&self, operation: &str, path: &str, body: &B) -> Result<()> {
        self.send(operation, self.request(Method::POST, path)?.json(body))
            .await?;
        Ok(())
    }

    async fn delete(&self, operation: &str, path: &str) -> Result<()> {
        self.send(operation, self.request(Method::DELETE, path)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl crate::service::DiskService for HttpEngine {
    async fn disk_list(&self) -> Result<Vec<Disk>> {
        self.get_json("disk list", "disks").await
    }

    async fn disk_lookup(&self, id: &str) -> Result<Option<Disk>> {
        self.get_json_opt("disk get", &format!("disks/{id}")).await
    }

    async fn disk_search(&self, name: &str) -> Result<Option<Disk>> {
        self.search("disk search", "disks", name).await
    }

    async fn disk_add(&self, def: &DiskDef) -> Result<Disk> {
        self.post_json("disk create", "disks", def).await
    }

    async fn disk_update(&self, id: &str, def: &DiskDef) -> Result<Disk> {
        let response = self
            .send(
                "disk update",
                self.request(Method::PUT, &format!("disks/{id}"))?.json(def),
            )
            .await?;
        self.json_of("disk update", response).await
    }

    async fn disk_remove(&self, id: &str) -> Result<()> {
        self.delete("disk remove", &format!("disks/{id}")).await
    }

    async fn disk_move(&self, id: &str, storage_domain_id: &str) -> Result<()> {
        self.post_action(
            "disk move",
            &format!("disks/{id}/move"),
            &serde_json::json!({ "storage_domain": { "id": storage_domain_id } }),
        )
        .await
    }

    async fn disk_copy(&self, id: &str, storage_domain_id: &str) -> Result<()> {
        self.post_action(
            "disk copy",
            &format!("disks/{id}/copy"),
            &serde_json::json!({ "storage_domain": { "id": storage_domain_id } }),
        )
        .await
    }
}

#[async_trait]
impl crate::service::VmService for HttpEngine {
    async fn vm_lookup(&self, id: &str) -> Result<Option<Vm>> {
        self.get_json_opt("VM get", &format!("vms/{id}")).await
    }

    async fn vm_search(&self, name: &str) -> Result<Option<Vm>> {
        self.search("VM search", "vms", name).await
    }

    async fn attachment_list(&self, vm_id: &str) -> Result<Vec<DiskAttachment>> {
        self.get_json("attachment list", &format!("vms/{vm_id}/diskattachments"))
            .await
    }

    async fn attachment_lookup(
        &self,
        vm_id: &str,
        disk_id: &str,
    ) -> Result<Option<DiskAttachment>> {
        let attachments = self.attachment_list(vm_id).await?;
        Ok(attachments.into_iter().find(|a| a.disk_id == disk_id))
    }

    async fn attach_disk(&self, vm_id: &str, def: &AttachmentDef) -> Result<DiskAttachment> {
        self.post_json("disk attach", &format!("vms/{vm_id}/diskattachments"), def)
            .await
    }

    async fn update_attachment(
        &self,
        vm_id: &str,
        attachment_id: &str,
        def: &AttachmentDef,
    ) -> Result<DiskAttachment> {
        let path = format!("vms/{vm_id}/diskattachments/{attachment_id}");
        let response = self
            .send(
                "attachment update",
                self.request(Method::PUT, &path)?.json(def),
            )
            .await?;
        self.json_of("attachment update", response).await
    }

    async fn detach_disk(&self, vm_id: &str, attachment_id: &str) -> Result<()> {
        self.delete(
            "disk detach",
            &format!("vms/{vm_id}/diskattachments/{attachment_id}"),
        )
        .await
    }
}

#[async_trait]
impl crate::service::StorageDomainService for HttpEngine {
    async fn storage_domain_search(&self, name: &str) -> Result<Option<StorageDomain>> {
        self.search("storage domain search", "storagedomains", name)
            .await
    }
}

#[async_trait]
impl crate::service::ImageTransferService for HttpEngine {
    async fn transfer_start(&self, disk_id: &str) -> Result<TransferSession> {
        self.post_json(
            "transfer create",
            "imagetransfers",
            &serde_json::json!({ "image": { "id": disk_id } }),
        )
        .await
    }

    async fn transfer_get(&self, id: &str) -> Result<TransferSession> {
        self.get_json("transfer get", &format!("imagetransfers/{id}"))
            .await
    }

    async fn transfer_extend(&self, id: &str) -> Result<()> {
        self.post_action(
            "transfer extend",
            &format!("imagetransfers/{id}/extend"),
            &serde_json::json!({}),
        )
        .await
    }

    async fn transfer_finalize(&self, id: &str) -> Result<()> {
        self.post_action(
            "transfer finalize",
            &format!("imagetransfers/{id}/finalize"),
            &serde_json::json!({}),
        )
        .await
    }
}
