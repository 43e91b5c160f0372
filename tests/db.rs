mod common;

use clovr::cache::ReportHandle;
use clovr::error::ClovrError;
use clovr::history::{BuildId, BuildOutcome};
use clovr::identity::ReportIdentity;
use clovr::target::CoverageTarget;

#[test]
fn attached_reports_survive_reopen() {
    let (mut conn, _dir, db_path) = common::setup_db();
    clovr::db::create_build(&conn, None).unwrap();

    let mut handle = (*common::handle(1, "")).clone();
    handle.healthy_target = Some(CoverageTarget::default_healthy());
    handle.unhealthy_target = Some(CoverageTarget::new(Some(0), None, None));
    clovr::db::attach_report(&mut conn, &handle).unwrap();
    let named = ReportHandle {
        identity: ReportIdentity::parse("integration").unwrap(),
        ..handle.clone()
    };
    clovr::db::attach_report(&mut conn, &named).unwrap();
    drop(conn);

    let conn = clovr::db::open(&db_path).unwrap();
    clovr::db::init_schema(&conn).unwrap();
    let handles = clovr::db::reports_for_build(&conn, BuildId(1)).unwrap();
    assert_eq!(handles, [handle, named]);
    assert_eq!(handles[0].unhealthy_target.unwrap().conditional, None);
}

#[test]
fn duplicate_identity_on_one_build_fails() {
    let (mut conn, _dir, _) = common::setup_db();
    clovr::db::create_build(&conn, None).unwrap();
    clovr::db::create_build(&conn, None).unwrap();

    let first = (*common::handle(1, "")).clone();
    clovr::db::attach_report(&mut conn, &first).unwrap();
    let err = clovr::db::attach_report(&mut conn, &first).unwrap_err();
    assert!(matches!(err, ClovrError::DuplicateIdentity { build: 1, .. }));

    // The same identity on another build is fine.
    let second = (*common::handle(2, "")).clone();
    clovr::db::attach_report(&mut conn, &second).unwrap();
}

#[test]
fn report_on_unknown_build_fails() {
    let (mut conn, _dir, _) = common::setup_db();
    let handle = (*common::handle(3, "")).clone();
    let err = clovr::db::attach_report(&mut conn, &handle).unwrap_err();
    assert!(matches!(err, ClovrError::BuildNotFound(3)));
}

#[test]
fn builds_list_in_number_order() {
    let (conn, _dir, _) = common::setup_db();
    clovr::db::create_build(&conn, Some(4)).unwrap();
    clovr::db::create_build(&conn, Some(2)).unwrap();
    clovr::db::set_outcome(&conn, BuildId(2), BuildOutcome::Unstable).unwrap();

    let rows = clovr::db::list_builds(&conn).unwrap();
    let ids: Vec<BuildId> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, [BuildId(2), BuildId(4)]);
    assert_eq!(rows[0].outcome, BuildOutcome::Unstable);
    assert!(!rows[0].created_at.is_empty());
}
