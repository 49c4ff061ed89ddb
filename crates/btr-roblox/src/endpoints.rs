//! Background implementations of each endpoint.
//!
//! Every handler receives the decoded argument list exactly as the caller
//! passed it, so argument checking happens here and surfaces to the caller
//! as a remote `InvalidParams` message.

use crate::hosts::{ApiHosts, Service};
use btr_bridge::{
    from_fn, BridgeError, Callable, QueryParams, RequestOptions, ResilientFetch, Result, Value,
};
use reqwest::Response;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub(crate) const DEFAULT_THUMBNAIL_SIZE: &str = "150x150";
const THUMBNAIL_FORMAT: &str = "Png";

/// Error codes the collections endpoint returns when there is nothing to do:
/// 7 when adding an item already collected, 8 when removing one that is not.
const ALREADY_IN_COLLECTION: i64 = 7;
const NOT_IN_COLLECTION: i64 = 8;

/// What every handler needs from the background.
#[derive(Clone)]
pub(crate) struct Endpoints {
    fetch: ResilientFetch,
    hosts: Arc<ApiHosts>,
}

impl Endpoints {
    pub(crate) fn new(fetch: ResilientFetch, hosts: ApiHosts) -> Self {
        Self {
            fetch,
            hosts: Arc::new(hosts),
        }
    }

    /// Bind a handler to this context.
    pub(crate) fn handler<F, Fut>(&self, f: F) -> impl Callable
    where
        F: Fn(Endpoints, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let endpoints = self.clone();
        from_fn(move |args: Vec<Value>| f(endpoints.clone(), args))
    }

    async fn send(&self, url: url::Url, options: RequestOptions) -> Result<Response> {
        self.fetch.request(url.as_str(), options).await
    }
}

fn required<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a Value> {
    match args.get(index) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(BridgeError::invalid_params(format!(
            "Missing argument {}",
            name
        ))),
    }
}

fn segment(value: &Value) -> String {
    urlencoding::encode(&value.canonical_string()).into_owned()
}

fn list(value: &Value, name: &str) -> Result<Vec<String>> {
    value
        .as_array()
        .map(|items| items.iter().map(Value::canonical_string).collect())
        .ok_or_else(|| BridgeError::invalid_params(format!("{} must be a list", name)))
}

fn optional_string(args: &[Value], index: usize, default: &str) -> String {
    match args.get(index) {
        Some(value) if !value.is_null() => value.canonical_string(),
        _ => default.to_string(),
    }
}

async fn json(response: Response) -> Result<Value> {
    let body: serde_json::Value = response.json().await.map_err(|e| BridgeError::Parse {
        message: format!("Response is not JSON: {}", e),
        source: None,
    })?;
    Ok(Value::from(body))
}

async fn json_data(response: Response) -> Result<Value> {
    let body = json(response).await?;
    Ok(body.get("data").cloned().unwrap_or_default())
}

pub(crate) async fn get_uncached_product_info(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let asset_id = required(&args, 0, "assetId")?;
    let mut url = ep.hosts.url(Service::Api, "marketplace/productinfo")?;
    url.query_pairs_mut()
        .append_pair("assetId", &asset_id.canonical_string());
    json(ep.send(url, RequestOptions::get()).await?).await
}

pub(crate) async fn delete_badge(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let badge_id = required(&args, 0, "badgeId")?;
    let url = ep.hosts.url(
        Service::Badges,
        &format!("v1/user/badges/{}", segment(badge_id)),
    )?;
    json(ep.send(url, RequestOptions::delete().with_trusted_token()).await?).await
}

pub(crate) async fn get_item_details(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let items = required(&args, 0, "items")?.clone();
    let url = ep.hosts.url(Service::Catalog, "v1/catalog/items/details")?;
    let body = serde_json::json!({ "items": items.into_json() });
    let options = RequestOptions::post().with_json(body).with_trusted_token();
    json(ep.send(url, options).await?).await
}

pub(crate) async fn get_bundle_details(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let bundle_id = required(&args, 0, "bundleId")?;
    let url = ep.hosts.url(
        Service::Catalog,
        &format!("v1/bundles/{}/details", segment(bundle_id)),
    )?;
    json(ep.send(url, RequestOptions::get()).await?).await
}

pub(crate) async fn get_friends(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let user_id = required(&args, 0, "userId")?;
    let url = ep.hosts.url(
        Service::Friends,
        &format!("v1/users/{}/friends", segment(user_id)),
    )?;
    json_data(ep.send(url, RequestOptions::get()).await?).await
}

pub(crate) async fn get_place_details(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let place_ids = list(required(&args, 0, "placeIds")?, "placeIds")?;
    let mut url = ep.hosts.url(Service::Games, "v1/games/multiget-place-details")?;
    {
        let mut query = url.query_pairs_mut();
        for id in &place_ids {
            query.append_pair("placeIds", id);
        }
    }
    json(ep.send(url, RequestOptions::get()).await?).await
}

/// Resolves to `{"inCollection": add}` when the item ends up in the requested
/// state and to `null` on any other failure, including a failed request.
pub(crate) async fn toggle_in_collection(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let asset_type = required(&args, 0, "assetType")?;
    let asset_id = required(&args, 1, "assetId")?;
    // Only a missing argument defaults to adding; an explicit null removes
    let add = args.get(2).map_or(true, Value::is_truthy);

    let url = ep.hosts.url(
        Service::Inventory,
        &format!(
            "v1/collections/items/{}/{}",
            segment(asset_type),
            segment(asset_id)
        ),
    )?;
    let options = if add {
        RequestOptions::post()
    } else {
        RequestOptions::delete()
    };

    let response = match ep.send(url, options.with_trusted_token()).await {
        Ok(response) => response,
        Err(e) => {
            debug!("Collection toggle failed: {}", e);
            return Ok(Value::Null);
        }
    };

    let ok = response.status().is_success();
    let body = json(response).await?;
    let code = body
        .get("errors")
        .and_then(|errors| errors.as_array())
        .and_then(|errors| errors.first())
        .and_then(|error| error.get("code"))
        .and_then(Value::as_i64);

    if ok || code == Some(ALREADY_IN_COLLECTION) || code == Some(NOT_IN_COLLECTION) {
        Ok(Value::Object(
            [("inCollection".to_string(), Value::Bool(add))]
                .into_iter()
                .collect(),
        ))
    } else {
        Ok(Value::Null)
    }
}

async fn thumbnails(
    ep: Endpoints,
    path: &str,
    ids_name: &str,
    ids: Vec<String>,
    size: String,
) -> Result<Value> {
    let mut url = ep.hosts.url(Service::Thumbnails, path)?;
    url.query_pairs_mut()
        .append_pair(ids_name, &ids.join(","))
        .append_pair("size", &size)
        .append_pair("format", THUMBNAIL_FORMAT);
    json_data(ep.send(url, RequestOptions::get()).await?).await
}

pub(crate) async fn get_avatar_headshots(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let user_ids = list(required(&args, 0, "userIds")?, "userIds")?;
    let size = optional_string(&args, 1, DEFAULT_THUMBNAIL_SIZE);
    thumbnails(ep, "v1/users/avatar-headshot", "userIds", user_ids, size).await
}

pub(crate) async fn get_avatar_thumbnails(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let user_ids = list(required(&args, 0, "userIds")?, "userIds")?;
    let size = optional_string(&args, 1, DEFAULT_THUMBNAIL_SIZE);
    thumbnails(ep, "v1/users/avatar", "userIds", user_ids, size).await
}

pub(crate) async fn get_asset_thumbnails(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let asset_ids = list(required(&args, 0, "assetIds")?, "assetIds")?;
    let size = required(&args, 1, "size")?.canonical_string();
    thumbnails(ep, "v1/assets", "assetIds", asset_ids, size).await
}

pub(crate) async fn get_profile_player_games(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let user_id = required(&args, 0, "userId")?;
    let mut url = ep.hosts.url(Service::Www, "users/profile/playergames-json")?;
    url.query_pairs_mut()
        .append_pair("userId", &user_id.canonical_string());
    json(ep.send(url, RequestOptions::get()).await?).await
}

pub(crate) async fn delete_asset_from_inventory(ep: Endpoints, args: Vec<Value>) -> Result<Value> {
    let asset_id = required(&args, 0, "assetId")?;
    let url = ep.hosts.url(Service::Www, "asset/delete-from-inventory")?;
    let form = QueryParams::new().with("assetId", asset_id.canonical_string());
    let options = RequestOptions::post().with_form(form).with_trusted_token();
    json(ep.send(url, options).await?).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_rejects_missing_and_null() {
        let args = vec![Value::from(1), Value::Null];
        assert!(required(&args, 0, "a").is_ok());
        assert!(matches!(
            required(&args, 1, "b"),
            Err(BridgeError::InvalidParams { .. })
        ));
        assert!(required(&args, 2, "c").is_err());
    }

    #[test]
    fn test_segment_is_percent_encoded() {
        assert_eq!(segment(&Value::from("a b/c")), "a%20b%2Fc");
        assert_eq!(segment(&Value::from(42)), "42");
    }

    #[test]
    fn test_list_uses_canonical_strings() {
        let ids = Value::Array(vec![1.into(), "2".into()]);
        assert_eq!(list(&ids, "ids").unwrap(), vec!["1", "2"]);
        assert!(list(&Value::from(1), "ids").is_err());
    }

    #[test]
    fn test_optional_string_defaults() {
        assert_eq!(optional_string(&[], 1, DEFAULT_THUMBNAIL_SIZE), "150x150");
        assert_eq!(
            optional_string(&[Value::Null, "420x420".into()], 1, DEFAULT_THUMBNAIL_SIZE),
            "420x420"
        );
    }
}
