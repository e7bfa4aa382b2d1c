// ==========================================
// 批量预留回滚测试
// ==========================================
// 职责: 验证 reserve_all 全成或全不成（库存不足 / 超时 / 停用批次）
// ==========================================


#[cfg(test)]
mod reservation_rollback_test {
    use material_reservation::domain::project::{Project, ProjectMaterialLine};
    use material_reservation::domain::types::{MaterialClass, ProjectStatus};
    use material_reservation::engine::EngineError;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::test_helpers::setup_env;

    const STEEL: MaterialClass = MaterialClass::Steel;

    #[tokio::test]
    async fn test_failed_line_rolls_back_earlier_reservations() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-A", dec!(100));
        env.seed_stock(STEEL, "S-B", dec!(100));
        env.seed_stock(STEEL, "S-C", dec!(5));

        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-A", dec!(40)),
                ("L2", STEEL, "S-B", dec!(70)),
                ("L3", STEEL, "S-C", dec!(8)),
            ],
        );

        let err = env.reserve_project("P1").await.unwrap_err();
        match err {
            EngineError::InsufficientStock { shortages } => {
                assert_eq!(shortages.len(), 1);
                assert_eq!(shortages[0].line_id.as_deref(), Some("L3"));
                assert_eq!(shortages[0].shortage, dec!(3));
            }
            other => panic!("Expected InsufficientStock, got {:?}", other),
        }

        for id in ["S-A", "S-B", "S-C"] {
            assert_eq!(env.stock(STEEL, id).reserved_quantity, Decimal::ZERO, "{}", id);
        }
        assert_eq!(env.engine.project("P1").unwrap().status, ProjectStatus::Planning);
        assert!(env.engine.reservations_for_project("P1").unwrap().is_empty());
        env.assert_consistent();

        // 补货后可重试成功
        env.engine
            .receive_stock(STEEL, "S-C", dec!(3))
            .await
            .unwrap();
        env.reserve_project("P1").await.unwrap();
        assert_eq!(env.stock(STEEL, "S-C").available_quantity(), Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_all_shortages_are_reported() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-A", dec!(10));
        env.seed_stock(STEEL, "S-B", dec!(100));
        env.seed_stock(MaterialClass::Rope, "R-1", dec!(1));

        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-A", dec!(15)),
                ("L2", STEEL, "S-B", dec!(20)),
                ("L3", MaterialClass::Rope, "R-1", dec!(2)),
            ],
        );

        let err = env.reserve_project("P1").await.unwrap_err();
        let EngineError::InsufficientStock { shortages } = err else {
            panic!("Expected InsufficientStock");
        };
        let lines: Vec<&str> = shortages.iter().filter_map(|s| s.line_id.as_deref()).collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&"L1"));
        assert!(lines.contains(&"L3"));
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_lines_sharing_a_lot_are_checked_cumulatively() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-A", dec!(100));
        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-A", dec!(60)),
                ("L2", STEEL, "S-A", dec!(60)),
            ],
        );

        // 单行都充足，合计不足
        let project = env.engine.project("P1").unwrap();
        let validated = env.engine.evaluate(&project.material_lines).unwrap();
        assert!(validated.iter().all(|v| v.stock_available));

        let err = env.engine.reserve_all("P1", &validated).await.unwrap_err();
        let EngineError::InsufficientStock { shortages } = err else {
            panic!("Expected InsufficientStock");
        };
        assert_eq!(shortages.len(), 1);
        assert_eq!(shortages[0].line_id.as_deref(), Some("L2"));
        assert_eq!(shortages[0].available, dec!(40));
        assert_eq!(env.stock(STEEL, "S-A").reserved_quantity, Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_timeout_rolls_back_and_reports() {
        let env = setup_env();
        env.set_reserve_timeout_ms(100);
        env.seed_stock(STEEL, "S-A", dec!(100));
        env.seed_stock(STEEL, "S-B", dec!(100));
        env.create_project(
            "P1",
            &[
                ("L1", STEEL, "S-A", dec!(10)),
                ("L2", STEEL, "S-B", dec!(10)),
            ],
        );

        // 占住第二个批次，S-A 先预留后在 S-B 上等待
        let hold = env.catalog.hold_item(STEEL, "S-B").await;
        let err = env.reserve_project("P1").await.unwrap_err();
        drop(hold);

        match err {
            EngineError::ReservationTimeout {
                project_id,
                timeout_ms,
            } => {
                assert_eq!(project_id, "P1");
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("Expected ReservationTimeout, got {:?}", other),
        }
        assert!(EngineError::ReservationTimeout {
            project_id: "P1".to_string(),
            timeout_ms: 100
        }
        .is_retryable());

        assert_eq!(env.stock(STEEL, "S-A").reserved_quantity, Decimal::ZERO);
        assert_eq!(env.stock(STEEL, "S-B").reserved_quantity, Decimal::ZERO);
        assert_eq!(env.engine.project("P1").unwrap().status, ProjectStatus::Planning);
        env.assert_consistent();

        // 释放后重试成功
        env.reserve_project("P1").await.unwrap();
        assert_eq!(env.stock(STEEL, "S-B").reserved_quantity, dec!(10));
    }

    #[tokio::test]
    async fn test_deactivated_lot_cannot_be_reserved() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-A", dec!(100));
        env.seed_stock(STEEL, "S-B", dec!(100));

        env.create_project("P1", &[("L1", STEEL, "S-A", dec!(10))]);
        env.reserve_project("P1").await.unwrap();

        // 有未结束预留时拒绝停用
        let err = env
            .engine
            .deactivate_stock_item(STEEL, "S-A")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BusinessRuleViolation(_)));
        assert!(env.stock(STEEL, "S-A").is_active);

        let item = env.engine.deactivate_stock_item(STEEL, "S-B").await.unwrap();
        assert!(!item.is_active);

        let p2 = env.create_project("P2", &[("L1", STEEL, "S-B", dec!(1))]);
        let validated = env.engine.evaluate(&p2.material_lines).unwrap();
        assert!(!validated[0].stock_available);
        assert_eq!(validated[0].available_stock, Some(Decimal::ZERO));

        let err = env.engine.reserve_all("P2", &validated).await.unwrap_err();
        let EngineError::InsufficientStock { shortages } = err else {
            panic!("Expected InsufficientStock");
        };
        assert_eq!(shortages[0].available, Decimal::ZERO);
        env.assert_consistent();
    }

    #[tokio::test]
    async fn test_invalid_quantities_are_rejected() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-A", dec!(100));
        let ledger = env.catalog.resolve(STEEL, "S-A").unwrap();

        assert!(matches!(
            ledger.reserve(Decimal::ZERO).await.unwrap_err(),
            EngineError::InvalidQuantity(_)
        ));
        assert!(matches!(
            ledger.receive(dec!(-5)).await.unwrap_err(),
            EngineError::InvalidQuantity(_)
        ));

        // 超额消耗被拒绝，不做静默修正
        ledger.reserve(dec!(10)).await.unwrap();
        let err = ledger.consume(dec!(11)).await.unwrap_err();
        assert!(matches!(err, EngineError::OverconsumptionError { .. }));
        let item = ledger.snapshot().unwrap();
        assert_eq!(item.reserved_quantity, dec!(10));
        assert_eq!(item.consumed_quantity, Decimal::ZERO);

        // 释放幂等: 超出部分按已预留量封顶
        assert_eq!(ledger.unreserve(dec!(10)).await.unwrap(), dec!(10));
        assert_eq!(ledger.unreserve(dec!(10)).await.unwrap(), Decimal::ZERO);
        assert_eq!(ledger.snapshot().unwrap().reserved_quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_overflowing_quantities_are_rejected() {
        let env = setup_env();
        env.seed_stock(STEEL, "S-1", dec!(100));

        // 入库溢出: 返回错误，台账不变
        let err = env
            .engine
            .receive_stock(STEEL, "S-1", Decimal::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));
        assert_eq!(env.stock(STEEL, "S-1").total_quantity, dec!(100));

        // 总价溢出: 关联库存行按批次单价计算
        let project = env.create_project("P1", &[("L1", STEEL, "S-1", Decimal::MAX)]);
        let err = env.engine.evaluate(&project.material_lines).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));

        // 自定义行在登记时即被拒绝
        let custom = Project::new("P2", "x").with_line(ProjectMaterialLine::custom(
            "L1",
            "P2",
            MaterialClass::Consumable,
            "特制卡扣",
            Decimal::MAX,
            "pcs",
            dec!(2),
        ));
        let err = env.engine.create_project(&custom).unwrap_err();
        assert!(matches!(err, EngineError::InvalidQuantity(_)));
        assert!(matches!(
            env.engine.project("P2").unwrap_err(),
            EngineError::ProjectNotFound(_)
        ));
        env.assert_consistent();
    }
}
