//! Client for the REMS-style access-management registry.
//!
//! Registers a dataset DOI as an applyable resource: organisation, license,
//! form, workflow, resource and catalogue item. Every write is
//! lookup-then-create: each sub-resource is listed first and matched by
//! `(organization, natural key)`, so redeliveries of the same completed
//! event never create duplicates.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{LicenseLocalization, RemsSettings, RemsTemplate};
use crate::error::RemsError;

/// HTTP client for the access registry.
///
/// Authenticates with the `x-rems-api-key` / `x-rems-user-id` header pair.
/// The configured user also owns the organisation and handles workflow
/// applications.
pub struct RemsClient {
    client: reqwest::Client,
    api: String,
    user: String,
    key: String,
    template: RemsTemplate,
}

#[derive(Debug, Deserialize)]
struct OrgRef {
    #[serde(rename = "organization/id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct LicenseEntry {
    id: i64,
    organization: OrgRef,
    localizations: HashMap<String, LicenseEntryLocalization>,
}

#[derive(Debug, Deserialize)]
struct LicenseEntryLocalization {
    title: String,
}

#[derive(Debug, Deserialize)]
struct FormEntry {
    #[serde(rename = "form/id")]
    id: i64,
    organization: OrgRef,
    #[serde(rename = "form/title")]
    title: String,
}

#[derive(Debug, Deserialize)]
struct WorkflowEntry {
    id: i64,
    organization: OrgRef,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    id: i64,
    organization: OrgRef,
    resid: String,
}

#[derive(Debug, Deserialize)]
struct CatalogueItemEntry {
    organization: OrgRef,
    resid: String,
    formid: i64,
    wfid: i64,
}

#[derive(Serialize)]
struct OrgIdRef<'a> {
    #[serde(rename = "organization/id")]
    id: &'a str,
}

#[derive(Serialize)]
struct UserRef<'a> {
    userid: &'a str,
}

#[derive(Serialize)]
struct OrganizationPayload<'a> {
    archived: bool,
    enabled: bool,
    #[serde(rename = "organization/id")]
    id: &'a str,
    #[serde(rename = "organization/short-name")]
    short_name: &'a str,
    #[serde(rename = "organization/name")]
    name: &'a str,
    #[serde(rename = "organization/owners")]
    owners: Vec<UserRef<'a>>,
}

#[derive(Serialize)]
struct LicensePayload<'a> {
    licensetype: &'static str,
    organization: OrgIdRef<'a>,
    localizations: &'a HashMap<String, LicenseLocalization>,
}

#[derive(Serialize)]
struct FormPayload<'a> {
    organization: OrgIdRef<'a>,
    #[serde(rename = "form/title")]
    title: &'a str,
    #[serde(rename = "form/fields")]
    fields: &'a Value,
}

#[derive(Serialize)]
struct WorkflowPayload<'a> {
    organization: OrgIdRef<'a>,
    title: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    handlers: Vec<&'a str>,
}

#[derive(Serialize)]
struct ResourcePayload<'a> {
    resid: &'a str,
    organization: OrgIdRef<'a>,
    licenses: Vec<i64>,
}

#[derive(Serialize)]
struct CataloguePayload<'a> {
    form: i64,
    resid: i64,
    wfid: i64,
    organization: OrgIdRef<'a>,
    localizations: CatalogueLocalizations,
    enabled: bool,
    archived: bool,
}

#[derive(Serialize)]
struct CatalogueLocalizations {
    en: CatalogueLocalization,
}

#[derive(Serialize)]
struct CatalogueLocalization {
    title: String,
    infourl: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    success: bool,
    #[serde(default)]
    id: Option<i64>,
}

impl RemsClient {
    /// Create a new access-registry client.
    pub fn new(settings: &RemsSettings, template: RemsTemplate) -> Self {
        Self {
            client: reqwest::Client::new(),
            api: settings.api.trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            key: settings.key.clone(),
            template,
        }
    }

    /// Register a dataset resource and everything it depends on.
    ///
    /// Sequenced so that each object exists before anything referencing it:
    /// organisation, license, form, workflow, then the resource keyed by the
    /// DOI, and finally the catalogue item binding them together.
    pub async fn register_resource(&self, doi: &str) -> Result<(), RemsError> {
        self.ensure_organization().await?;
        let license_id = self.ensure_license().await?;
        let form_id = self.ensure_form().await?;
        let workflow_id = self.ensure_workflow().await?;
        let resource_id = self.ensure_resource(doi, license_id).await?;
        self.ensure_catalogue_item(form_id, resource_id, workflow_id, doi)
            .await?;
        Ok(())
    }

    fn org_id(&self) -> &str {
        &self.template.organization.id
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-rems-api-key", &self.key)
            .header("x-rems-user-id", &self.user)
    }

    /// List a sub-resource endpoint.
    ///
    /// A non-success status is logged and reported as "nothing found"; the
    /// caller falls through to creation, which surfaces the real failure if
    /// the registry is actually down.
    async fn list<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>, RemsError> {
        let url = format!("{}/api/{}", self.api, resource);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RemsError::Network { source: e })?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| RemsError::Network { source: e })
        } else {
            tracing::warn!(
                resource,
                status = response.status().as_u16(),
                "listing access registry objects failed"
            );
            Ok(Vec::new())
        }
    }

    async fn create<T: Serialize>(
        &self,
        resource: &str,
        payload: &T,
    ) -> Result<CreateResponse, RemsError> {
        let url = format!("{}/api/{}/create", self.api, resource);
        let response = self
            .request(self.client.post(&url).json(payload))
            .send()
            .await
            .map_err(|e| RemsError::Network { source: e })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemsError::Api {
                resource: resource.to_string(),
                status,
                message,
            });
        }

        let parsed: CreateResponse = response
            .json()
            .await
            .map_err(|e| RemsError::Network { source: e })?;
        if !parsed.success {
            return Err(RemsError::CreateRejected {
                resource: resource.to_string(),
            });
        }
        tracing::info!(resource, id = ?parsed.id, "created access registry object");
        Ok(parsed)
    }

    async fn create_with_id<T: Serialize>(
        &self,
        resource: &str,
        payload: &T,
    ) -> Result<i64, RemsError> {
        let response = self.create(resource, payload).await?;
        response.id.ok_or_else(|| RemsError::MissingId {
            resource: resource.to_string(),
        })
    }

    /// Make sure the configured organisation exists.
    async fn ensure_organization(&self) -> Result<(), RemsError> {
        let org = &self.template.organization;
        let url = format!("{}/api/organizations/{}", self.api, org.id);
        let response = self
            .request(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RemsError::Network { source: e })?;

        if response.status().is_success() {
            let found: OrgRef = response
                .json()
                .await
                .map_err(|e| RemsError::Network { source: e })?;
            if found.id == org.id {
                tracing::info!(organization = %org.id, "organization exists");
                return Ok(());
            }
        }

        let payload = OrganizationPayload {
            archived: false,
            enabled: true,
            id: &org.id,
            short_name: &org.short_name,
            name: &org.name,
            owners: vec![UserRef { userid: &self.user }],
        };
        self.create("organizations", &payload).await?;
        Ok(())
    }

    /// Reuse or create the license keyed by its English title.
    async fn ensure_license(&self) -> Result<i64, RemsError> {
        let title = self.template.license.english_title();
        let entries: Vec<LicenseEntry> = self.list("licenses").await?;
        if let Some(found) = entries.iter().find(|l| {
            l.organization.id == self.org_id()
                && l.localizations.get("en").map(|en| en.title.as_str()) == Some(title)
        }) {
            tracing::info!(id = found.id, title, "license exists");
            return Ok(found.id);
        }

        let payload = LicensePayload {
            licensetype: "link",
            organization: OrgIdRef { id: self.org_id() },
            localizations: &self.template.license.localizations,
        };
        self.create_with_id("licenses", &payload).await
    }

    /// Reuse or create the application form keyed by its title.
    async fn ensure_form(&self) -> Result<i64, RemsError> {
        let title = &self.template.form.title;
        let entries: Vec<FormEntry> = self.list("forms").await?;
        if let Some(found) = entries
            .iter()
            .find(|f| f.organization.id == self.org_id() && f.title == *title)
        {
            tracing::info!(id = found.id, title = %title, "form exists");
            return Ok(found.id);
        }

        let payload = FormPayload {
            organization: OrgIdRef { id: self.org_id() },
            title,
            fields: &self.template.form.fields,
        };
        self.create_with_id("forms", &payload).await
    }

    /// Reuse or create the default workflow keyed by its title.
    async fn ensure_workflow(&self) -> Result<i64, RemsError> {
        let title = &self.template.workflow.title;
        let entries: Vec<WorkflowEntry> = self.list("workflows").await?;
        if let Some(found) = entries
            .iter()
            .find(|w| w.organization.id == self.org_id() && w.title == *title)
        {
            tracing::info!(id = found.id, title = %title, "workflow exists");
            return Ok(found.id);
        }

        let payload = WorkflowPayload {
            organization: OrgIdRef { id: self.org_id() },
            title,
            kind: "workflow/default",
            handlers: vec![self.user.as_str()],
        };
        self.create_with_id("workflows", &payload).await
    }

    /// Reuse or create the resource keyed by the DOI.
    async fn ensure_resource(&self, doi: &str, license_id: i64) -> Result<i64, RemsError> {
        let entries: Vec<ResourceEntry> = self.list("resources").await?;
        if let Some(found) = entries
            .iter()
            .find(|r| r.organization.id == self.org_id() && r.resid == doi)
        {
            tracing::info!(id = found.id, doi, "resource exists");
            return Ok(found.id);
        }

        let payload = ResourcePayload {
            resid: doi,
            organization: OrgIdRef { id: self.org_id() },
            licenses: vec![license_id],
        };
        self.create_with_id("resources", &payload).await
    }

    /// Reuse or create the catalogue item binding form, resource and workflow.
    async fn ensure_catalogue_item(
        &self,
        form_id: i64,
        resource_id: i64,
        workflow_id: i64,
        doi: &str,
    ) -> Result<(), RemsError> {
        let entries: Vec<CatalogueItemEntry> = self.list("catalogue-items").await?;
        // The listing reports the resource by its external id, i.e. the DOI.
        if entries.iter().any(|c| {
            c.organization.id == self.org_id()
                && c.resid == doi
                && c.formid == form_id
                && c.wfid == workflow_id
        }) {
            tracing::info!(doi, "catalogue item exists");
            return Ok(());
        }

        let payload = CataloguePayload {
            form: form_id,
            resid: resource_id,
            wfid: workflow_id,
            organization: OrgIdRef { id: self.org_id() },
            localizations: CatalogueLocalizations {
                en: CatalogueLocalization {
                    title: format!("Catalogue item for resource {doi}"),
                    infourl: doi.to_string(),
                },
            },
            enabled: true,
            archived: false,
        };
        self.create("catalogue-items", &payload).await?;
        Ok(())
    }
}
