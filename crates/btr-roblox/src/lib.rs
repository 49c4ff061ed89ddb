//! BTR Roblox - the extension's catalog of Roblox web API calls.
//!
//! Every endpoint is a bridged procedure under the `RobloxApi` namespace, so
//! the same [`RobloxApi`] value works in both contexts: in the background it
//! performs the HTTP request with the runtime's cookies and XSRF token, in the
//! foreground it forwards the call.
//!
//! Endpoints are wrapped in a fixed order, giving them the identities
//! `RobloxApi.0` through `RobloxApi.11`. Both contexts must construct the
//! registry so those identities line up.
//!
//! # Example
//!
//! ```rust,ignore
//! use btr_roblox::RobloxApi;
//!
//! let api = RobloxApi::new(&runtime)?;
//! let friends = api.get_friends(1).await?;
//! let info = api.get_product_info(1818).await?; // cached after the first call
//! ```

mod endpoints;
pub mod hosts;

pub use hosts::{ApiHosts, Service};

use btr_bridge::{BridgeConfig, BridgeRuntime, Bridged, Callable, Memoized, Result, Value};
use endpoints::Endpoints;
use std::collections::BTreeMap;

/// Dotted endpoint names in registration order.
///
/// `api.getProductInfo` is a caller-side cache over
/// `api.getUncachedProductInfo` and has no identity of its own.
pub const ENDPOINT_NAMES: &[&str] = &[
    "api.getUncachedProductInfo",
    "api.getProductInfo",
    "badges.deleteBadge",
    "catalog.getItemDetails",
    "catalog.getBundleDetails",
    "friends.getFriends",
    "games.getPlaceDetails",
    "inventory.toggleInCollection",
    "thumbnails.getAvatarHeadshots",
    "thumbnails.getAvatarThumbnails",
    "thumbnails.getAssetThumbnails",
    "www.getProfilePlayerGames",
    "www.deleteAssetFromInventory",
];

/// Reference to a catalog item for [`RobloxApi::get_item_details`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub item_type: String,
    pub id: u64,
}

impl CatalogItem {
    pub fn asset(id: u64) -> Self {
        Self {
            item_type: "Asset".to_string(),
            id,
        }
    }

    pub fn bundle(id: u64) -> Self {
        Self {
            item_type: "Bundle".to_string(),
            id,
        }
    }
}

impl From<CatalogItem> for Value {
    fn from(item: CatalogItem) -> Self {
        let mut map = BTreeMap::new();
        map.insert("itemType".to_string(), Value::from(item.item_type));
        map.insert("id".to_string(), Value::from(item.id));
        Value::Object(map)
    }
}

/// The endpoint registry.
#[derive(Debug, Clone)]
pub struct RobloxApi {
    get_uncached_product_info: Bridged,
    get_product_info: Memoized<Bridged>,
    delete_badge: Bridged,
    get_item_details: Bridged,
    get_bundle_details: Memoized<Bridged>,
    get_friends: Bridged,
    get_place_details: Bridged,
    toggle_in_collection: Bridged,
    get_avatar_headshots: Bridged,
    get_avatar_thumbnails: Bridged,
    get_asset_thumbnails: Bridged,
    get_profile_player_games: Bridged,
    delete_asset_from_inventory: Bridged,
}

fn ids(ids: &[u64]) -> Value {
    Value::Array(ids.iter().copied().map(Value::from).collect())
}

impl RobloxApi {
    /// Register every endpoint against the real Roblox hosts.
    pub fn new(runtime: &BridgeRuntime) -> Result<Self> {
        Self::with_hosts(runtime, ApiHosts::roblox())
    }

    /// Register every endpoint against `hosts`. Only the background uses
    /// the hosts; the foreground forwards calls.
    pub fn with_hosts(runtime: &BridgeRuntime, hosts: ApiHosts) -> Result<Self> {
        let ns = BridgeConfig::DEFAULT_NAMESPACE;
        let ep = Endpoints::new(runtime.fetch().clone(), hosts);

        let get_uncached_product_info =
            runtime.wrap(ns, ep.handler(endpoints::get_uncached_product_info))?;
        let get_product_info = runtime.memoize(get_uncached_product_info.clone());

        Ok(Self {
            get_uncached_product_info,
            get_product_info,
            delete_badge: runtime.wrap(ns, ep.handler(endpoints::delete_badge))?,
            get_item_details: runtime.wrap(ns, ep.handler(endpoints::get_item_details))?,
            get_bundle_details: runtime
                .memoize_bridged(ns, ep.handler(endpoints::get_bundle_details))?,
            get_friends: runtime.wrap(ns, ep.handler(endpoints::get_friends))?,
            get_place_details: runtime.wrap(ns, ep.handler(endpoints::get_place_details))?,
            toggle_in_collection: runtime
                .wrap(ns, ep.handler(endpoints::toggle_in_collection))?,
            get_avatar_headshots: runtime
                .wrap(ns, ep.handler(endpoints::get_avatar_headshots))?,
            get_avatar_thumbnails: runtime
                .wrap(ns, ep.handler(endpoints::get_avatar_thumbnails))?,
            get_asset_thumbnails: runtime
                .wrap(ns, ep.handler(endpoints::get_asset_thumbnails))?,
            get_profile_player_games: runtime
                .wrap(ns, ep.handler(endpoints::get_profile_player_games))?,
            delete_asset_from_inventory: runtime
                .wrap(ns, ep.handler(endpoints::delete_asset_from_inventory))?,
        })
    }

    /// Look up an endpoint by its dotted name, e.g. `"friends.getFriends"`.
    pub fn endpoint(&self, name: &str) -> Option<&dyn Callable> {
        let callable: &dyn Callable = match name {
            "api.getUncachedProductInfo" => &self.get_uncached_product_info,
            "api.getProductInfo" => &self.get_product_info,
            "badges.deleteBadge" => &self.delete_badge,
            "catalog.getItemDetails" => &self.get_item_details,
            "catalog.getBundleDetails" => &self.get_bundle_details,
            "friends.getFriends" => &self.get_friends,
            "games.getPlaceDetails" => &self.get_place_details,
            "inventory.toggleInCollection" => &self.toggle_in_collection,
            "thumbnails.getAvatarHeadshots" => &self.get_avatar_headshots,
            "thumbnails.getAvatarThumbnails" => &self.get_avatar_thumbnails,
            "thumbnails.getAssetThumbnails" => &self.get_asset_thumbnails,
            "www.getProfilePlayerGames" => &self.get_profile_player_games,
            "www.deleteAssetFromInventory" => &self.delete_asset_from_inventory,
            _ => return None,
        };
        Some(callable)
    }

    pub async fn get_uncached_product_info(&self, asset_id: u64) -> Result<Value> {
        self.get_uncached_product_info
            .call(vec![asset_id.into()])
            .await
    }

    /// Product info, fetched once per asset for the life of the process.
    pub async fn get_product_info(&self, asset_id: u64) -> Result<Value> {
        self.get_product_info.call(vec![asset_id.into()]).await
    }

    pub async fn delete_badge(&self, badge_id: u64) -> Result<Value> {
        self.delete_badge.call(vec![badge_id.into()]).await
    }

    pub async fn get_item_details(&self, items: Vec<CatalogItem>) -> Result<Value> {
        self.get_item_details.call(vec![items.into()]).await
    }

    /// Bundle details, fetched once per bundle for the life of the process.
    pub async fn get_bundle_details(&self, bundle_id: u64) -> Result<Value> {
        self.get_bundle_details.call(vec![bundle_id.into()]).await
    }

    /// The `data` list of the user's friends response.
    pub async fn get_friends(&self, user_id: u64) -> Result<Value> {
        self.get_friends.call(vec![user_id.into()]).await
    }

    pub async fn get_place_details(&self, place_ids: &[u64]) -> Result<Value> {
        self.get_place_details.call(vec![ids(place_ids)]).await
    }

    /// Add the item to (or remove it from) the user's collection.
    ///
    /// Resolves to `{"inCollection": add}` on success, or when the item was
    /// already in the requested state, and to `null` on any other failure.
    pub async fn toggle_in_collection(
        &self,
        asset_type: &str,
        asset_id: u64,
        add: bool,
    ) -> Result<Value> {
        self.toggle_in_collection
            .call(vec![asset_type.into(), asset_id.into(), add.into()])
            .await
    }

    /// `size` defaults to `150x150`.
    pub async fn get_avatar_headshots(&self, user_ids: &[u64], size: Option<&str>) -> Result<Value> {
        self.get_avatar_headshots
            .call(vec![ids(user_ids), size.into()])
            .await
    }

    /// `size` defaults to `150x150`.
    pub async fn get_avatar_thumbnails(
        &self,
        user_ids: &[u64],
        size: Option<&str>,
    ) -> Result<Value> {
        self.get_avatar_thumbnails
            .call(vec![ids(user_ids), size.into()])
            .await
    }

    pub async fn get_asset_thumbnails(&self, asset_ids: &[u64], size: &str) -> Result<Value> {
        self.get_asset_thumbnails
            .call(vec![ids(asset_ids), size.into()])
            .await
    }

    pub async fn get_profile_player_games(&self, user_id: u64) -> Result<Value> {
        self.get_profile_player_games
            .call(vec![user_id.into()])
            .await
    }

    pub async fn delete_asset_from_inventory(&self, asset_id: u64) -> Result<Value> {
        self.delete_asset_from_inventory
            .call(vec![asset_id.into()])
            .await
    }
}
