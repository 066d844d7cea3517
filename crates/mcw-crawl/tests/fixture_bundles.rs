// Every enabled fixture market in markets.yaml must ship a loadable crawl bundle.

use std::path::{Path, PathBuf};

use mcw_crawl::{bundle_to_drafts, load_crawl_bundle};

#[derive(serde::Deserialize)]
struct Registry {
    markets: Vec<Market>,
}

#[derive(serde::Deserialize)]
struct Market {
    market: String,
    enabled: bool,
    mode: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[test]
fn enabled_fixture_markets_have_bundles() {
    let root = workspace_root();
    let registry: Registry =
        serde_yaml::from_str(&std::fs::read_to_string(root.join("markets.yaml")).unwrap()).unwrap();

    let fixture_markets: Vec<_> = registry
        .markets
        .iter()
        .filter(|m| m.enabled && m.mode == "fixture")
        .collect();
    assert!(!fixture_markets.is_empty());

    for market in fixture_markets {
        let path = root
            .join("fixtures")
            .join(&market.market)
            .join("sample/bundle.json");
        let bundle = load_crawl_bundle(&path).unwrap();
        assert_eq!(bundle.market, market.market);
        let drafts = bundle_to_drafts(&bundle).unwrap();
        assert_eq!(drafts.len(), bundle.pages.len());
    }
}
