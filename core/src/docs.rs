//! Document methods (`docs.*`).
//!
//! Each method fills a `ParameterSet`, hands it to `VkApi::call` and reshapes
//! the `Response`. Constraints live on the parameter set, so a bad argument
//! fails before anything is sent.

use crate::auth::{CaptchaSolution, Session};
use crate::client::VkApi;
use crate::error::Error;
use crate::params::ParameterSet;
use crate::response::Response;
use crate::types::{Document, ItemsPage, UploadServerInfo};

pub struct DocsCategory<'a> {
    api: &'a VkApi,
    session: &'a Session,
}

impl<'a> DocsCategory<'a> {
    pub fn new(api: &'a VkApi, session: &'a Session) -> Self {
        Self { api, session }
    }

    fn call(&self, method: &str, params: &ParameterSet) -> Result<Response, Error> {
        self.api.call(method, params, self.session)
    }

    /// `docs.get`: documents of a user or community, newest first.
    pub fn get(
        &self,
        count: Option<i64>,
        offset: Option<i64>,
        owner_id: Option<i64>,
    ) -> Result<ItemsPage<Document>, Error> {
        let mut params = ParameterSet::new();
        params
            .set_non_negative("count", count)
            .set_non_negative("offset", offset)
            .set("owner_id", owner_id);

        let response = self.call("docs.get", &params)?;
        let total_count = response.get("count").as_i64()?;
        let items = response.get("items").to_vec(|node| node.deserialize())?;
        Ok(ItemsPage { total_count, items })
    }

    /// `docs.getById` for `(owner_id, doc_id)` pairs.
    pub fn get_by_id(&self, docs: &[(i64, i64)]) -> Result<Vec<Document>, Error> {
        let mut params = ParameterSet::new();
        params.set_owned_ids("docs", docs);

        let response = self.call("docs.getById", &params)?;
        Ok(response.node().to_vec(|node| node.deserialize())?)
    }

    /// `docs.getUploadServer`.
    pub fn get_upload_server(&self, group_id: Option<i64>) -> Result<UploadServerInfo, Error> {
        let mut params = ParameterSet::new();
        params.set_non_negative("group_id", group_id);
        Ok(self.call("docs.getUploadServer", &params)?.node().deserialize()?)
    }

    /// `docs.getWallUploadServer`.
    pub fn get_wall_upload_server(&self, group_id: Option<i64>) -> Result<UploadServerInfo, Error> {
        let mut params = ParameterSet::new();
        params.set_non_negative("group_id", group_id);
        Ok(self.call("docs.getWallUploadServer", &params)?.node().deserialize()?)
    }

    /// `docs.save` after uploading. `file` is the string returned by the
    /// upload server; `file` and `title` are required.
    pub fn save(
        &self,
        file: &str,
        title: &str,
        tags: Option<&str>,
        captcha: Option<&CaptchaSolution>,
    ) -> Result<Vec<Document>, Error> {
        let mut params = ParameterSet::new();
        params
            .set_required("file", file)
            .set_required("title", title)
            .set("tags", tags)
            .set("captcha_sid", captcha.map(|c| c.sid))
            .set("captcha_key", captcha.map(|c| c.key.as_str()));

        let response = self.call("docs.save", &params)?;
        Ok(response.node().to_vec(|node| node.deserialize())?)
    }

    /// `docs.delete`. True when the provider confirms the deletion.
    pub fn delete(&self, owner_id: i64, doc_id: i64) -> Result<bool, Error> {
        let mut params = ParameterSet::new();
        params.set("owner_id", owner_id).set_non_negative("doc_id", doc_id);
        Ok(self.call("docs.delete", &params)?.node().as_bool()?)
    }

    /// `docs.add`: copy a document into the current user's list. Returns
    /// the new document id.
    pub fn add(&self, owner_id: i64, doc_id: i64, access_key: Option<&str>) -> Result<i64, Error> {
        let mut params = ParameterSet::new();
        params
            .set("owner_id", owner_id)
            .set_non_negative("doc_id", doc_id)
            .set("access_key", access_key);
        Ok(self.call("docs.add", &params)?.node().as_i64()?)
    }
}
