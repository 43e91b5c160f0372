mod common;

use std::sync::Arc;

use clovr::history::{BuildChain, BuildId, BuildOutcome, Builds, ResolvedNode};
use clovr::identity::ReportIdentity;
use clovr::model::{Coverage, CoverageNode, NodeKind, PathEntry};
use clovr::publish::{publish, PublishOutcome};

/// Three builds publishing the same workspace; build 2 regresses and then
/// fails.
fn three_builds() -> (Builds, tempfile::TempDir) {
    let (mut conn, dir, _) = common::setup_db();
    let workspace = dir.path().join("ws");
    let data_dir = dir.path().join("data");
    let mut builds = Builds::new(common::clover_cache());

    for (n, fixture) in [(1, "clover.xml"), (2, "clover-regressed.xml"), (3, "clover.xml")] {
        common::stage_report(&workspace, "target/clover", fixture);
        clovr::db::create_build(&conn, Some(n)).unwrap();
        let outcome = publish(
            &mut conn,
            &mut builds,
            &data_dir,
            &common::request(&workspace, n),
        )
        .unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));
    }
    clovr::db::set_outcome(&conn, BuildId(2), BuildOutcome::Failure).unwrap();
    builds.set_outcome(BuildId(2), BuildOutcome::Failure).unwrap();
    (builds, dir)
}

#[test]
fn previous_result_skips_failed_builds() {
    let (builds, _dir) = three_builds();
    let tree = builds.report(BuildId(3), &ReportIdentity::legacy()).unwrap();

    let project = ResolvedNode::project(Arc::clone(&tree));
    assert_eq!(project.build(), Some(BuildId(3)));
    let previous = project.previous_result(&builds).unwrap();
    assert_eq!(previous.build(), Some(BuildId(1)));
    assert!(previous.previous_result(&builds).is_none());
}

#[test]
fn previous_result_of_every_node_kind() {
    let (builds, _dir) = three_builds();
    let tree = builds.report(BuildId(3), &ReportIdentity::legacy()).unwrap();

    let package = ResolvedNode::package(Arc::clone(&tree), "com.shop.pay").unwrap();
    let prev = package.previous_result(&builds).unwrap();
    assert_eq!(prev.node().kind(), NodeKind::Package);
    assert_eq!(prev.node().name(), "com.shop.pay");
    assert_eq!(prev.build(), Some(BuildId(1)));

    let file =
        ResolvedNode::file(Arc::clone(&tree), "src/main/java/com/shop/cart/Cart.java").unwrap();
    let prev = file.previous_result(&builds).unwrap();
    assert_eq!(prev.node().kind(), NodeKind::File);

    let class = ResolvedNode::class(Arc::clone(&tree), "com.shop.cart.LineItem").unwrap();
    let prev = class.previous_result(&builds).unwrap();
    assert_eq!(prev.node().qualified_name(), "com.shop.cart.LineItem");
    assert_eq!(prev.build(), Some(BuildId(1)));
}

#[test]
fn previous_result_is_none_when_node_disappeared() {
    let (mut builds, _dir) = three_builds();
    // With build 2 counted as successful, its regressed report has no pay
    // package.
    builds.set_outcome(BuildId(2), BuildOutcome::Success).unwrap();
    let tree = builds.report(BuildId(3), &ReportIdentity::legacy()).unwrap();

    let package = ResolvedNode::package(Arc::clone(&tree), "com.shop.pay").unwrap();
    assert!(package.previous_result(&builds).is_none());

    let cart = ResolvedNode::package(tree, "com.shop.cart").unwrap();
    let prev = cart.previous_result(&builds).unwrap();
    assert_eq!(prev.build(), Some(BuildId(2)));
    assert_eq!(prev.node().method_coverage().to_string(), "10/20");
}

#[test]
fn trend_walks_back_newest_first() {
    let (mut builds, _dir) = three_builds();
    let tree = builds.report(BuildId(3), &ReportIdentity::legacy()).unwrap();
    let cart = ResolvedNode::class(Arc::clone(&tree), "com.shop.cart.Cart").unwrap();

    let points = cart.trend(&builds, 10);
    let ids: Vec<u64> = points.iter().map(|p| p.build.0).collect();
    assert_eq!(ids, [3, 1]);
    assert!((points[0].method - 87.5).abs() < 1e-9);

    builds.set_outcome(BuildId(2), BuildOutcome::Unstable).unwrap();
    let points = cart.trend(&builds, 10);
    let ids: Vec<u64> = points.iter().map(|p| p.build.0).collect();
    assert_eq!(ids, [3, 2, 1]);
    assert!((points[1].method - 50.0).abs() < 1e-9);

    assert_eq!(cart.trend(&builds, 2).len(), 2);
}

#[test]
fn chain_follows_registered_builds() {
    let (builds, _dir) = three_builds();
    assert_eq!(builds.previous_build(BuildId(3)), Some(BuildId(2)));
    assert_eq!(builds.previous_build(BuildId(1)), None);
    assert!(builds.is_failure(BuildId(2)));
    assert!(builds
        .attached_report(BuildId(1), &ReportIdentity::legacy())
        .unwrap()
        .is_some());
    assert!(builds
        .attached_report(BuildId(1), &ReportIdentity::parse("other").unwrap())
        .unwrap()
        .is_none());
}

#[test]
fn unloadable_earlier_report_ends_the_walk() {
    let (mut builds, _dir) = three_builds();
    builds.set_outcome(BuildId(2), BuildOutcome::Unstable).unwrap();
    let legacy = ReportIdentity::legacy();
    let tree = builds.report(BuildId(3), &legacy).unwrap();

    builds.cache().invalidate_all();
    let archived = builds.handle(BuildId(2), &legacy).unwrap().report_path.clone();
    std::fs::remove_file(&archived).unwrap();

    assert!(builds.attached_report(BuildId(2), &legacy).is_err());
    // Build 1 still loads, but the walk must not skip past build 2.
    assert!(builds.attached_report(BuildId(1), &legacy).unwrap().is_some());
    let project = ResolvedNode::project(Arc::clone(&tree));
    assert!(project.previous_result(&builds).is_none());
    let cart = ResolvedNode::class(tree, "com.shop.cart.Cart").unwrap();
    let ids: Vec<u64> = cart.trend(&builds, 10).iter().map(|p| p.build.0).collect();
    assert_eq!(ids, [3]);
}

#[test]
fn class_reached_through_its_file_keeps_its_package() {
    let (builds, _dir) = three_builds();
    let tree = builds.report(BuildId(3), &ReportIdentity::legacy()).unwrap();

    let project = CoverageNode::from(&*tree);
    let package = project
        .children()
        .into_iter()
        .find(|n| n.name() == "com.shop.cart")
        .unwrap();
    let file = package
        .children()
        .into_iter()
        .find(|n| n.name() == "src/main/java/com/shop/cart/Cart.java")
        .unwrap();
    let class = file.children().into_iter().next().unwrap();
    assert!(matches!(class, CoverageNode::Class { package: "com.shop.cart", .. }));
    assert_eq!(class.qualified_name(), "com.shop.cart.Cart");

    let prev = class.previous_result(&builds).unwrap();
    assert_eq!(prev.build(), Some(BuildId(1)));
    assert_eq!(prev.node().qualified_name(), "com.shop.cart.Cart");
}

#[test]
fn class_and_path_lookup() {
    let (builds, _dir) = three_builds();
    let tree = builds.report(BuildId(1), &ReportIdentity::legacy()).unwrap();

    assert!(tree.find_class_coverage("com.shop.cart.Cart").is_some());
    assert!(tree.find_class_coverage("com.shop.Cart").is_none());
    let node = tree.find_class_node("com.shop.pay.Checkout").unwrap();
    assert!(matches!(node, CoverageNode::Class { package: "com.shop.pay", .. }));

    let cart = tree.find_package_coverage("com.shop.cart").unwrap();
    let Some(PathEntry::Directory(src)) = cart.resolve_path("src") else {
        panic!("src should be a directory");
    };
    let mut dir = src;
    for token in ["main", "java", "com", "shop", "cart"] {
        dir = match dir.resolve(token) {
            Some(PathEntry::Directory(next)) => next,
            other => panic!("{token} resolved to {other:?}"),
        };
    }
    assert_eq!(dir.files().count(), 2);
    assert!(matches!(dir.resolve("Cart.java"), Some(PathEntry::File(_))));
    let Some(PathEntry::Directory(model)) = dir.resolve("model") else {
        panic!("model should be a directory");
    };
    assert!(matches!(model.resolve("LineItem.java"), Some(PathEntry::File(f)) if f.name().ends_with("LineItem.java")));
    assert!(dir.resolve("Missing.java").is_none());
}

#[test]
fn reload_from_store_keeps_history() {
    let (mut conn, dir, _) = common::setup_db();
    let workspace = dir.path().join("ws");
    let data_dir = dir.path().join("data");
    {
        let mut builds = Builds::new(common::clover_cache());
        for n in 1..=2 {
            common::stage_report(&workspace, "target/clover", "clover.xml");
            clovr::db::create_build(&conn, None).unwrap();
            publish(&mut conn, &mut builds, &data_dir, &common::request(&workspace, n)).unwrap();
        }
    }

    let builds = Builds::from_store(&conn, common::clover_cache()).unwrap();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds.latest(), Some(BuildId(2)));
    let tree = builds.report(BuildId(2), &ReportIdentity::legacy()).unwrap();
    let previous = ResolvedNode::project(tree).previous_result(&builds).unwrap();
    assert_eq!(previous.build(), Some(BuildId(1)));
    assert_eq!(previous.node().name(), "Shop");
}
