// ==========================================
// 预留全流程测试
// ==========================================
// 职责: 验证 evaluate → reserve_all → activate → complete / cancel
// ==========================================


#[cfg(test)]
mod reservation_flow_test {
    use material_reservation::config::config_keys;
    use material_reservation::domain::project::{Project, ProjectMaterialLine};
    use material_reservation::domain::types::{
        MaterialClass, MaterialLineStatus, ProjectStatus, ReservationStatus,
    };
    use material_reservation::engine::{EngineError, ReservationEventType};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::test_helpers::setup_env;

    const STEEL: MaterialClass = MaterialClass::Steel;

    // ==========================================
    // 场景1: 预留后其他项目看到减少的可用量
    // ==========================================

    #[tokio::test]
    async fn test_second_project_sees_reduced_availability() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));

        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);
        env.reserve_project("P1").await.unwrap();

        let item = env.stock(STEEL, "S-100");
        assert_eq!(item.reserved_quantity, dec!(60));
        assert_eq!(item.available_quantity(), dec!(40));

        let p2 = env.create_project("P2", &[("L1", STEEL, "S-100", dec!(50))]);
        let validated = env.engine.evaluate(&p2.material_lines).unwrap();
        assert!(!validated[0].stock_available);
        assert_eq!(validated[0].available_stock, Some(dec!(40)));
        assert_eq!(validated[0].line.unit_price, dec!(10));
        assert_eq!(validated[0].line.total_price, dec!(500));

        let err = env.engine.reserve_all("P2", &validated).await.unwrap_err();
        match err {
            EngineError::InsufficientStock { shortages } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].stock_item_id, "S-100");
                assert_eq!(shortages[0].line_id.as_deref(), Some("L1"));
                assert_eq!(shortages[0].requested, dec!(50));
                assert_eq!(shortages[0].available, dec!(40));
                assert_eq!(shortages[0].shortage, dec!(10));
            }
            other => panic!("Expected InsufficientStock, got {:?}", other),
        }

        // 失败不改变任何状态
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, dec!(60));
        assert_eq!(env.engine.project("P2").unwrap().status, ProjectStatus::Planning);
        assert!(env.engine.reservations_for_project("P2").unwrap().is_empty());
        env.assert_consistent();
    }

    // ==========================================
    // 场景2: 全量消耗
    // ==========================================

    #[tokio::test]
    async fn test_full_lifecycle_consumes_reserved_stock() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);

        let outcome = env.reserve_project("P1").await.unwrap();
        assert_eq!(outcome.reservations.len(), 1);
        let reservation_id = outcome.reservations[0].reservation_id.clone();

        let project = env.engine.project("P1").unwrap();
        assert_eq!(project.status, ProjectStatus::Reserved);
        assert_eq!(project.material_lines[0].status, MaterialLineStatus::Reserved);
        assert_eq!(project.material_lines[0].reserved_quantity, dec!(60));
        env.assert_consistent();

        let activated = env.engine.activate("P1").await.unwrap();
        assert_eq!(activated, vec![reservation_id.clone()]);
        assert_eq!(
            env.engine.reservation(&reservation_id).unwrap().status,
            ReservationStatus::Active
        );
        // 开工不发生数量流转
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, dec!(60));
        env.assert_consistent();

        let completion = env.engine.complete("P1").await.unwrap();
        assert_eq!(completion.completed_reservation_ids, vec![reservation_id.clone()]);
        assert_eq!(completion.consumed_total, dec!(60));
        assert_eq!(completion.released_total, Decimal::ZERO);

        let item = env.stock(STEEL, "S-100");
        assert_eq!(item.consumed_quantity, dec!(60));
        assert_eq!(item.reserved_quantity, Decimal::ZERO);
        assert_eq!(item.remaining_quantity(), dec!(40));
        assert_eq!(item.total_quantity, dec!(100));

        let reservation = env.engine.reservation(&reservation_id).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Completed);
        assert_eq!(reservation.used_quantity, Some(dec!(60)));

        let project = env.engine.project("P1").unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        assert_eq!(project.material_lines[0].status, MaterialLineStatus::Completed);
        assert_eq!(project.material_lines[0].used_quantity, dec!(60));
        env.assert_consistent();
    }

    // ==========================================
    // 场景3: 取消预留
    // ==========================================

    #[tokio::test]
    async fn test_cancel_reservation_restores_availability() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);
        let outcome = env.reserve_project("P1").await.unwrap();
        let reservation_id = outcome.reservations[0].reservation_id.clone();

        let cancelled = env.engine.cancel_reservation(&reservation_id).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        let item = env.stock(STEEL, "S-100");
        assert_eq!(item.reserved_quantity, Decimal::ZERO);
        assert_eq!(item.available_quantity(), dec!(100));

        let line = env.engine.project("P1").unwrap().material_lines[0].clone();
        assert_eq!(line.status, MaterialLineStatus::Planned);
        assert_eq!(line.reserved_quantity, Decimal::ZERO);

        // 已取消的预留不能再次取消
        let err = env.engine.cancel_reservation(&reservation_id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidReservationState {
                actual: ReservationStatus::Cancelled,
                ..
            }
        ));
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_project_with_cancelled_line_cannot_proceed() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.seed_stock(MaterialClass::Rope, "R-1", dec!(20));
        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-100", dec!(60)),
                ("L2", MaterialClass::Rope, "R-1", dec!(5)),
            ],
        );
        let outcome = env.reserve_project("P1").await.unwrap();
        let l1 = outcome
            .reservations
            .iter()
            .find(|r| r.material_line_id == "L1")
            .unwrap()
            .reservation_id
            .clone();

        // 已预留的项目取消一行后不能开工
        env.engine.cancel_reservation(&l1).await.unwrap();
        let err = env.engine.activate("P1").await.unwrap_err();
        match err {
            EngineError::UnreservedLines { line_ids, .. } => assert_eq!(line_ids, vec!["L1"]),
            other => panic!("Expected UnreservedLines, got {:?}", other),
        }
        assert_eq!(env.engine.project("P1").unwrap().status, ProjectStatus::Reserved);

        // 只能整体取消
        env.engine.cancel_project("P1").await.unwrap();
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, Decimal::ZERO);
        assert_eq!(env.stock(MaterialClass::Rope, "R-1").reserved_quantity, Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_active_project_with_cancelled_line_cannot_complete() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.seed_stock(MaterialClass::Rope, "R-1", dec!(20));
        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-100", dec!(60)),
                ("L2", MaterialClass::Rope, "R-1", dec!(5)),
            ],
        );
        let outcome = env.reserve_project("P1").await.unwrap();
        env.engine.activate("P1").await.unwrap();

        let l2 = outcome
            .reservations
            .iter()
            .find(|r| r.material_line_id == "L2")
            .unwrap()
            .reservation_id
            .clone();
        env.engine.cancel_reservation(&l2).await.unwrap();

        let err = env.engine.complete("P1").await.unwrap_err();
        assert!(matches!(err, EngineError::UnreservedLines { .. }));

        // 完工被拒时不发生任何消耗
        let project = env.engine.project("P1").unwrap();
        assert_eq!(project.status, ProjectStatus::Active);
        assert_eq!(env.stock(STEEL, "S-100").consumed_quantity, Decimal::ZERO);
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, dec!(60));
        assert_eq!(env.stock(MaterialClass::Rope, "R-1").reserved_quantity, Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_reserve_requires_every_project_line() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        let p1 = env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-100", dec!(60)),
                ("L2", STEEL, "S-100", dec!(10)),
            ],
        );

        // 空批次
        let err = env.engine.reserve_all("P1", &[]).await.unwrap_err();
        match err {
            EngineError::UnreservedLines { line_ids, .. } => {
                assert_eq!(line_ids, vec!["L1", "L2"]);
            }
            other => panic!("Expected UnreservedLines, got {:?}", other),
        }

        // 部分批次
        let validated = env.engine.evaluate(&p1.material_lines[..1]).unwrap();
        let err = env.engine.reserve_all("P1", &validated).await.unwrap_err();
        match err {
            EngineError::UnreservedLines { line_ids, .. } => assert_eq!(line_ids, vec!["L2"]),
            other => panic!("Expected UnreservedLines, got {:?}", other),
        }

        let project = env.engine.project("P1").unwrap();
        assert_eq!(project.status, ProjectStatus::Planning);
        assert!(project
            .material_lines
            .iter()
            .all(|l| l.status == MaterialLineStatus::Planned));
        assert!(env.engine.reservations_for_project("P1").unwrap().is_empty());
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, Decimal::ZERO);
        assert!(matches!(
            env.engine.activate("P1").await.unwrap_err(),
            EngineError::InvalidProjectState { .. }
        ));

        // 完整批次成功
        let validated = env.engine.evaluate(&p1.material_lines).unwrap();
        let outcome = env.engine.reserve_all("P1", &validated).await.unwrap();
        assert_eq!(outcome.reservations.len(), 2);
        env.assert_consistent();
    }

    // ==========================================
    // 场景4: 冲突检测
    // ==========================================

    #[tokio::test]
    async fn test_check_conflicts_reports_shortage() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);
        env.reserve_project("P1").await.unwrap();
        env.create_project("P2", &[("L1", STEEL, "S-100", dec!(50))]);

        let conflicts = env.engine.check_conflicts("P2").unwrap();
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.line_id, "L1");
        assert_eq!(conflict.reserved_by_others, dec!(60));
        assert_eq!(conflict.remaining_quantity, dec!(100));
        assert_eq!(conflict.shortage, dec!(10));
        assert_eq!(conflict.conflicting_projects, vec!["P1".to_string()]);

        // 项目自身的预留不算冲突
        assert!(env.engine.check_conflicts("P1").unwrap().is_empty());
    }

    // ==========================================
    // 部分用量
    // ==========================================

    #[tokio::test]
    async fn test_partial_usage_releases_remainder_on_completion() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);
        let outcome = env.reserve_project("P1").await.unwrap();
        let reservation_id = outcome.reservations[0].reservation_id.clone();

        // 开工前不能登记用量
        let err = env.engine.record_usage(&reservation_id, dec!(10)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidReservationState { .. }));

        env.engine.activate("P1").await.unwrap();

        let err = env.engine.record_usage(&reservation_id, dec!(61)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));

        let updated = env.engine.record_usage(&reservation_id, dec!(45)).await.unwrap();
        assert_eq!(updated.used_quantity, Some(dec!(45)));
        assert_eq!(updated.status, ReservationStatus::Active);
        let line = env.engine.project("P1").unwrap().material_lines[0].clone();
        assert_eq!(line.status, MaterialLineStatus::Used);
        assert_eq!(line.used_quantity, dec!(45));

        let completion = env.engine.complete("P1").await.unwrap();
        assert_eq!(completion.consumed_total, dec!(45));
        assert_eq!(completion.released_total, dec!(15));

        let item = env.stock(STEEL, "S-100");
        assert_eq!(item.consumed_quantity, dec!(45));
        assert_eq!(item.reserved_quantity, Decimal::ZERO);
        assert_eq!(item.available_quantity(), dec!(55));
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_partial_usage_can_be_disabled() {
        let env = setup_env();
        env.set_config(config_keys::ALLOW_PARTIAL_USAGE, "false");
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(60))]);
        let outcome = env.reserve_project("P1").await.unwrap();
        env.engine.activate("P1").await.unwrap();

        let err = env
            .engine
            .record_usage(&outcome.reservations[0].reservation_id, dec!(10))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BusinessRuleViolation(_)));
    }

    // ==========================================
    // 自定义物料与多类别
    // ==========================================

    #[tokio::test]
    async fn test_custom_lines_are_ordered_and_hold_no_stock() {
        let env = setup_env();
        env.seed_stock(MaterialClass::Rope, "R-1", dec!(30));
        env.seed_stock(MaterialClass::Membrane, "M-1", dec!(80));

        let project = Project::new("P1", "展棚项目")
            .with_line(ProjectMaterialLine::stock_backed(
                "L1", "P1", MaterialClass::Rope, "R-1", dec!(12.5), "m",
            ))
            .with_line(ProjectMaterialLine::stock_backed(
                "L2", "P1", MaterialClass::Membrane, "M-1", dec!(20), "m2",
            ))
            .with_line(ProjectMaterialLine::custom(
                "L3", "P1", MaterialClass::Consumable, "特制卡扣", dec!(40), "pcs", dec!(1.5),
            ));
        env.engine.create_project(&project).unwrap();

        let validated = env.engine.evaluate(&project.material_lines).unwrap();
        assert!(validated[0].stock_available);
        assert!(validated[1].stock_available);
        assert!(!validated[2].stock_available);
        assert_eq!(validated[2].available_stock, None);
        assert_eq!(validated[2].line.status, MaterialLineStatus::Ordered);

        let outcome = env.engine.reserve_all("P1", &validated).await.unwrap();
        assert_eq!(outcome.reservations.len(), 2);
        assert_eq!(outcome.ordered_line_ids, vec!["L3".to_string()]);

        let project = env.engine.project("P1").unwrap();
        let custom = project.line("L3").unwrap();
        assert_eq!(custom.status, MaterialLineStatus::Ordered);
        assert_eq!(custom.reserved_quantity, Decimal::ZERO);
        assert_eq!(custom.total_price, dec!(60));

        assert_eq!(env.stock(MaterialClass::Rope, "R-1").reserved_quantity, dec!(12.5));
        assert_eq!(env.stock(MaterialClass::Membrane, "M-1").reserved_quantity, dec!(20));
        env.assert_consistent();
    }

    // ==========================================
    // 项目状态约束
    // ==========================================

    #[tokio::test]
    async fn test_operations_rejected_in_wrong_project_state() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-100", dec!(10))]);

        let err = env.engine.activate("P1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProjectState {
                actual: ProjectStatus::Planning,
                ..
            }
        ));
        let err = env.engine.complete("P1").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidProjectState { .. }));

        env.reserve_project("P1").await.unwrap();
        let err = env.reserve_project("P1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProjectState {
                actual: ProjectStatus::Reserved,
                ..
            }
        ));
        // 重复预留不产生副作用
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, dec!(10));

        env.engine.activate("P1").await.unwrap();
        env.engine.complete("P1").await.unwrap();
        let err = env.engine.cancel_project("P1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidProjectState {
                actual: ProjectStatus::Completed,
                ..
            }
        ));
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_unknown_project_and_line() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-100", dec!(100));
        let p1 = env.create_project("P1", &[("L1", STEEL, "S-100", dec!(10))]);
        env.create_project("P2", &[("L9", STEEL, "S-100", dec!(10))]);

        let err = env.engine.activate("NOPE").await.unwrap_err();
        assert!(matches!(err, EngineError::ProjectNotFound(_)));

        // P1 的校验结果提交到 P2
        let validated = env.engine.evaluate(&p1.material_lines).unwrap();
        let err = env.engine.reserve_all("P2", &validated).await.unwrap_err();
        assert!(matches!(err, EngineError::LineNotInProject { .. }));
        assert_eq!(env.stock(STEEL, "S-100").reserved_quantity, Decimal::ZERO);
    }

    // ==========================================
    // 项目取消
    // ==========================================

    #[tokio::test]
    async fn test_cancel_active_project_releases_everything() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-1", dec!(100));
        env.seed_stock(MaterialClass::Wick, "W-1", dec!(50));
        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-1", dec!(30)),
                ("L2", MaterialClass::Wick, "W-1", dec!(50)),
            ],
        );
        env.reserve_project("P1").await.unwrap();
        env.engine.activate("P1").await.unwrap();

        let cancelled = env.engine.cancel_project("P1").await.unwrap();
        assert_eq!(cancelled.len(), 2);

        assert_eq!(env.stock(STEEL, "S-1").reserved_quantity, Decimal::ZERO);
        assert_eq!(env.stock(MaterialClass::Wick, "W-1").reserved_quantity, Decimal::ZERO);
        assert_eq!(env.engine.project("P1").unwrap().status, ProjectStatus::Cancelled);
        assert!(env
            .engine
            .reservations_for_project("P1")
            .unwrap()
            .iter()
            .all(|r| r.status == ReservationStatus::Cancelled));
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_cancel_planning_project_without_reservations() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-1", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-1", dec!(30))]);

        let cancelled = env.engine.cancel_project("P1").await.unwrap();
        assert!(cancelled.is_empty());
        assert_eq!(env.engine.project("P1").unwrap().status, ProjectStatus::Cancelled);

        let err = env.reserve_project("P1").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidProjectState { .. }));
    }

    // ==========================================
    // 事件
    // ==========================================

    #[tokio::test]
    async fn test_lifecycle_events_are_published() {
        let env = setup_env();
        let mut receiver = env.events.subscribe();
        env.seed_stock(STEEL, "S-1", dec!(100));
        env.create_project("P1", &[("L1", STEEL, "S-1", dec!(30))]);

        env.reserve_project("P1").await.unwrap();
        env.engine.activate("P1").await.unwrap();
        env.engine.complete("P1").await.unwrap();

        let mut types = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            assert_eq!(event.project_id, "P1");
            assert_eq!(event.reservation_ids.len(), 1);
            types.push(event.event_type);
        }
        assert_eq!(
            types,
            vec![
                ReservationEventType::Reserved,
                ReservationEventType::Activated,
                ReservationEventType::Completed,
            ]
        );
    }
}
