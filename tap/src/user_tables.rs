//! TAP+ user tables and sharing.
//!
//! Logged-in users can upload tables into their private `user_<name>`
//! schema, edit column metadata, rename and delete them, and share them with
//! groups of other users. Every operation here is one request and needs both
//! a session and a service that has the endpoint.

use strum::{Display, EnumString};
use tracing::info;
use votable::OutputFormat;

use crate::client::TapClient;
use crate::error::{TapError, TapResult};
use crate::http::HttpRequest;
use crate::request::{is_identifier, UploadSource};
use crate::tables::TableName;
use crate::xml::{self, Element};

/// Column role flag understood by the TAP+ table tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ColumnFlag {
    Ra,
    Dec,
    Mag,
    Flux,
    /// Primary key
    #[strum(serialize = "PK")]
    Pk,
    #[default]
    #[strum(serialize = "NULL")]
    None,
}

/// New metadata for one column of a user table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnUpdate {
    pub name: String,
    pub ucd: Option<String>,
    pub utype: Option<String>,
    pub flag: ColumnFlag,
    pub indexed: bool,
}

impl ColumnUpdate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn ucd(mut self, ucd: impl Into<String>) -> Self {
        self.ucd = Some(ucd.into());
        self
    }

    pub fn utype(mut self, utype: impl Into<String>) -> Self {
        self.utype = Some(utype.into());
        self
    }

    pub fn flag(mut self, flag: ColumnFlag) -> Self {
        self.flag = flag;
        self
    }

    pub fn indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }
}

/// A group tables can be shared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub users: Vec<String>,
}

impl TapClient {
    fn tap_plus_endpoint(
        &self,
        endpoint: &Option<String>,
        operation: &'static str,
    ) -> TapResult<String> {
        self.require_session(operation)?;
        Ok(self
            .service()
            .require_endpoint(endpoint, operation)?
            .to_string())
    }

    fn expect_ok(&self, request: HttpRequest) -> TapResult<Vec<u8>> {
        let response = self.send(request, false)?;
        if response.is_success() || response.is_redirect() {
            Ok(response.body)
        } else {
            Err(self.error_from_response(&response, None))
        }
    }

    fn qualify(&self, table: &str) -> TapResult<TableName> {
        let name: TableName = table.parse()?;
        if name.schema.is_some() {
            return Ok(name);
        }
        let user = self.require_session("user table access")?.user.clone();
        TableName::user_table(&user, &name.table)
    }

    /// Upload a table into the user's schema and return its qualified name.
    pub fn upload_table(
        &self,
        source: UploadSource,
        table_name: &str,
        description: Option<&str>,
    ) -> TapResult<TableName> {
        let url = self.tap_plus_endpoint(&self.service().upload_url, "table upload")?;
        if !is_identifier(table_name) {
            return Err(TapError::InvalidInput(format!(
                "'{table_name}' is not a valid table name"
            )));
        }
        let user = self.require_session("table upload")?.user.clone();

        let format = match &source {
            UploadSource::File(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase())
                .map(|e| match e.as_str() {
                    "csv" => OutputFormat::Csv,
                    "fits" | "fit" => OutputFormat::Fits,
                    "json" => OutputFormat::Json,
                    _ => OutputFormat::Votable,
                })
                .unwrap_or(OutputFormat::Votable),
            UploadSource::Url(_) | UploadSource::Table(_) => OutputFormat::Votable,
        };

        let mut request = HttpRequest::post(url)
            .param("TABLE_NAME", table_name)
            .param("TABLE_DESC", description.unwrap_or_default())
            .param("FORMAT", format.as_str());
        match &source {
            UploadSource::Url(source_url) => request = request.param("URL", source_url.as_str()),
            other => {
                if let Some(part) = other.file_part("FILE")? {
                    request = request.file(part);
                }
            }
        }
        self.expect_ok(request)?;

        let name = TableName::user_table(&user, table_name)?;
        info!("Uploaded table {name}");
        Ok(name)
    }

    /// Delete a user table. Unqualified names refer to the user's schema.
    pub fn delete_user_table(&self, table: &str) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().upload_url, "table deletion")?;
        let name = self.qualify(table)?;
        if !name.is_private() {
            return Err(TapError::InvalidInput(format!(
                "{name} is not a user table and cannot be deleted"
            )));
        }
        let request = HttpRequest::post(url)
            .param("TABLE_NAME", name.table.as_str())
            .param("DELETE", "TRUE")
            .param("FORCE_REMOVAL", "TRUE");
        self.expect_ok(request)?;
        info!("Deleted table {name}");
        Ok(())
    }

    /// Change UCDs, utypes, flags and indexing of user table columns.
    pub fn update_table_columns(&self, table: &str, updates: &[ColumnUpdate]) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().table_tool_url, "column update")?;
        if updates.is_empty() {
            return Err(TapError::InvalidInput("no column updates given".into()));
        }
        let name = self.qualify(table)?;

        let mut request = HttpRequest::post(url)
            .param("ACTION", "edit")
            .param("NUMTABLES", "1")
            .param("TABLE0_NUMCOLS", updates.len().to_string())
            .param("TABLE0", name.qualified());
        for (i, update) in updates.iter().enumerate() {
            let key = format!("TABLE0_COL{i}");
            request = request
                .param(key.as_str(), update.name.as_str())
                .param(format!("{key}_UCD"), update.ucd.clone().unwrap_or_default())
                .param(
                    format!("{key}_UTYPE"),
                    update.utype.clone().unwrap_or_default(),
                )
                .param(format!("{key}_FLAGS"), update.flag.to_string())
                .param(format!("{key}_INDEXED"), update.indexed.to_string());
        }
        self.expect_ok(request)?;
        info!("Updated {} columns of {name}", updates.len());
        Ok(())
    }

    /// Rename a user table and, optionally, some of its columns.
    pub fn rename_table(
        &self,
        table: &str,
        new_name: Option<&str>,
        column_renames: &[(&str, &str)],
    ) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().table_tool_url, "table rename")?;
        if new_name.is_none() && column_renames.is_empty() {
            return Err(TapError::InvalidInput(
                "rename needs a new table name or column renames".into(),
            ));
        }
        let name = self.qualify(table)?;

        let mut request = HttpRequest::post(url)
            .param("action", "rename")
            .param("table_name", name.qualified());
        if let Some(new_name) = new_name {
            if !is_identifier(new_name) {
                return Err(TapError::InvalidInput(format!(
                    "'{new_name}' is not a valid table name"
                )));
            }
            request = request.param("new_table_name", new_name);
        }
        if !column_renames.is_empty() {
            let renames = column_renames
                .iter()
                .map(|(old, new)| format!("{old}:{new}"))
                .collect::<Vec<_>>()
                .join(",");
            request = request.param("new_column_names", renames);
        }
        self.expect_ok(request)?;
        info!("Renamed {name}");
        Ok(())
    }

    // =========================================================================
    // Groups and sharing
    // =========================================================================

    pub fn load_groups(&self) -> TapResult<Vec<Group>> {
        let url = self.tap_plus_endpoint(&self.service().share_url, "group listing")?;
        let body = self.expect_ok(HttpRequest::get(url).param("action", "GetGroups"))?;
        parse_groups(&body)
    }

    pub fn create_group(&self, title: &str, description: Option<&str>) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().share_url, "group creation")?;
        if title.trim().is_empty() {
            return Err(TapError::InvalidInput("group title is empty".into()));
        }
        let request = HttpRequest::post(url)
            .param("action", "CreateOrUpdateGroup")
            .param("title", title)
            .param("description", description.unwrap_or_default());
        self.expect_ok(request)?;
        info!("Created group {title}");
        Ok(())
    }

    pub fn delete_group(&self, title: &str) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().share_url, "group deletion")?;
        let group = self.find_group(title)?;
        let request = HttpRequest::post(url)
            .param("action", "RemoveGroup")
            .param("group_id", group.id.as_str());
        self.expect_ok(request)?;
        info!("Deleted group {title}");
        Ok(())
    }

    /// Give a group read access to a user table.
    pub fn share_table(&self, table: &str, group: &str, description: Option<&str>) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().share_url, "table sharing")?;
        let name = self.qualify(table)?;
        let group = self.find_group(group)?;
        let request = HttpRequest::post(url)
            .param("action", "CreateOrUpdateItem")
            .param("resource_type", "0")
            .param("title", name.qualified())
            .param("description", description.unwrap_or_default())
            .param("items_list", format!("{}|Group|Read", group.id));
        self.expect_ok(request)?;
        info!("Shared {name} with group {}", group.title);
        Ok(())
    }

    pub fn stop_sharing_table(&self, table: &str, group: &str) -> TapResult<()> {
        let url = self.tap_plus_endpoint(&self.service().share_url, "table sharing")?;
        let name = self.qualify(table)?;
        let group = self.find_group(group)?;
        let request = HttpRequest::post(url)
            .param("action", "RemoveItem")
            .param("resource_type", "0")
            .param("resource_id", name.qualified())
            .param("group_id", group.id.as_str());
        self.expect_ok(request)?;
        info!("Stopped sharing {name} with group {}", group.title);
        Ok(())
    }

    fn find_group(&self, title: &str) -> TapResult<Group> {
        self.load_groups()?
            .into_iter()
            .find(|g| g.title == title)
            .ok_or_else(|| TapError::InvalidInput(format!("no group titled '{title}'")))
    }
}

/// Parse the share servlet's group list. Group fields may be given as
/// attributes or as child elements.
fn parse_groups(bytes: &[u8]) -> TapResult<Vec<Group>> {
    let root = xml::parse(bytes, "group list")?;
    let field = |e: &Element, name: &str| -> Option<String> {
        e.attr(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| e.child_text(name))
    };

    let mut groups = Vec::new();
    let mut stack = vec![&root];
    while let Some(element) = stack.pop() {
        if element.name == "group" {
            let id = field(element, "id")
                .ok_or_else(|| TapError::document("group list", "group without id"))?;
            let title = field(element, "title").unwrap_or_else(|| id.clone());
            let users = element
                .child("users")
                .map(|u| {
                    u.children_named("user")
                        .filter_map(|user| field(user, "id").or_else(|| field(user, "name")))
                        .collect()
                })
                .unwrap_or_default();
            groups.push(Group {
                id,
                title,
                description: field(element, "description"),
                owner: field(element, "owner"),
                users,
            });
        } else {
            stack.extend(element.children.iter().rev());
        }
    }
    Ok(groups)
}
