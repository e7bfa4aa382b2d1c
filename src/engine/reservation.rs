// ==========================================
// 物料库存预留系统 - 预留引擎
// ==========================================
// 职责: 项目物料的 校验 → 预留 → 开工 → 完工/取消 全流程
// 流程: evaluate → (check_conflicts) → reserve_all → activate → complete
// 并发:
// - 批次层: StockLedger 批次锁 + revision 乐观锁
// - 项目层: 同一项目的批量操作经项目锁串行化
// - reserve_all 跨批次: 固定顺序加锁，失败/超时按逆序补偿回滚
// 红线: 引擎不拼 SQL；数量只在仓储边界解析
// ==========================================

use crate::config::{ConfigError, ReservationConfigReader};
use crate::domain::project::{LineSource, Project, ProjectMaterialLine};
use crate::domain::reservation::{
    CompletionOutcome, ConsistencyReport, Reservation, ReservationOutcome, StockConflict,
    StockShortage, ValidatedLine,
};
use crate::domain::stock::StockItem;
use crate::domain::types::{MaterialClass, MaterialLineStatus, ProjectStatus, ReservationStatus};
use crate::engine::catalog::MaterialCatalog;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::events::{
    OptionalEventPublisher, ReservationEvent, ReservationEventPublisher, ReservationEventType,
};
use crate::engine::ledger::StockLedger;
use crate::engine::lifecycle::{ProjectLifecycle, ProjectOperation};
use crate::engine::locks::KeyedLocks;
use crate::repository::{ProjectRepository, RepositoryError, ReservationRepository};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// ReserveStep - 批量预留中的单步
// ==========================================
struct ReserveStep {
    ledger: StockLedger,
    line_id: String,
    quantity: Decimal,
}

impl ReserveStep {
    // 全局统一加锁顺序
    fn sort_key(&self) -> (MaterialClass, &str, &str) {
        (
            self.ledger.material_class(),
            self.ledger.stock_item_id(),
            self.line_id.as_str(),
        )
    }
}

/// 已提交的预留步骤: (步骤下标, 提交时批次单价)
type AppliedStep = (usize, Decimal);

// ==========================================
// ReservationEngine - 预留引擎
// ==========================================
pub struct ReservationEngine<C>
where
    C: ReservationConfigReader,
{
    // 物料目录（批次解析 + 批次锁）
    catalog: Arc<MaterialCatalog>,

    // 数据访问层
    project_repo: Arc<ProjectRepository>,
    reservation_repo: Arc<ReservationRepository>,

    // 配置读取器
    config: Arc<C>,

    // 项目锁
    project_locks: KeyedLocks<String>,

    // 事件发布
    events: OptionalEventPublisher,
}

impl<C> ReservationEngine<C>
where
    C: ReservationConfigReader,
{
    /// 创建新的 ReservationEngine 实例
    pub fn new(
        catalog: Arc<MaterialCatalog>,
        project_repo: Arc<ProjectRepository>,
        reservation_repo: Arc<ReservationRepository>,
        config: Arc<C>,
    ) -> Self {
        Self {
            catalog,
            project_repo,
            reservation_repo,
            config,
            project_locks: KeyedLocks::new(),
            events: OptionalEventPublisher::none(),
        }
    }

    /// 配置事件发布者
    pub fn with_event_publisher(mut self, publisher: Arc<dyn ReservationEventPublisher>) -> Self {
        self.events = OptionalEventPublisher::with_publisher(publisher);
        self
    }

    pub fn catalog(&self) -> &Arc<MaterialCatalog> {
        &self.catalog
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 读取项目（含物料清单）
    pub fn project(&self, project_id: &str) -> EngineResult<Project> {
        self.project_repo
            .find_by_id(project_id)?
            .ok_or_else(|| EngineError::ProjectNotFound(project_id.to_string()))
    }

    /// 读取预留记录
    pub fn reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        self.reservation_repo
            .find_by_id(reservation_id)?
            .ok_or_else(|| EngineError::ReservationNotFound(reservation_id.to_string()))
    }

    /// 项目的全部预留记录
    pub fn reservations_for_project(&self, project_id: &str) -> EngineResult<Vec<Reservation>> {
        Ok(self.reservation_repo.find_by_project(project_id)?)
    }

    // ==========================================
    // create_project - 登记项目
    // ==========================================

    /// 登记计划中的项目及其物料清单
    ///
    /// 关联库存的物料行必须指向已存在的批次；此时不做充足性校验
    #[instrument(skip(self, project), fields(project_id = %project.project_id))]
    pub fn create_project(&self, project: &Project) -> EngineResult<()> {
        if project.status != ProjectStatus::Planning {
            return Err(EngineError::InvalidProjectState {
                project_id: project.project_id.clone(),
                actual: project.status,
                expected: ProjectStatus::Planning.to_string(),
            });
        }

        let mut seen = HashSet::new();
        for line in &project.material_lines {
            if line.project_id != project.project_id {
                return Err(EngineError::LineNotInProject {
                    project_id: project.project_id.clone(),
                    line_id: line.line_id.clone(),
                });
            }
            if !seen.insert(line.line_id.as_str()) {
                return Err(EngineError::BusinessRuleViolation(format!(
                    "物料行 {} 重复",
                    line.line_id
                )));
            }
            if line.requested_quantity <= Decimal::ZERO {
                return Err(EngineError::InvalidQuantity(format!(
                    "物料行 {} 需求量必须大于 0，实际 {}",
                    line.line_id, line.requested_quantity
                )));
            }
            match line.source.stock_item_id() {
                Some(stock_item_id) => {
                    self.catalog.resolve(line.material_class, stock_item_id)?;
                }
                None => {
                    line_total(line, line.unit_price)?;
                }
            }
        }

        self.project_repo.insert(project)?;
        info!(lines = project.material_lines.len(), "项目已登记");
        Ok(())
    }

    // ==========================================
    // evaluate - 物料行库存校验（无副作用）
    // ==========================================

    /// 校验物料行的库存充足性并回填单价
    ///
    /// - 关联库存的行: 回填批次单价/总价与当前可用量
    /// - 自定义物料行: stock_available = false，状态置为 ORDERED（转采购）
    #[instrument(skip(self, lines), fields(line_count = lines.len()))]
    pub fn evaluate(&self, lines: &[ProjectMaterialLine]) -> EngineResult<Vec<ValidatedLine>> {
        let mut validated = Vec::with_capacity(lines.len());

        for line in lines {
            if line.requested_quantity <= Decimal::ZERO {
                return Err(EngineError::InvalidQuantity(format!(
                    "物料行 {} 需求量必须大于 0，实际 {}",
                    line.line_id, line.requested_quantity
                )));
            }

            let mut evaluated = line.clone();
            let result = match &line.source {
                LineSource::Custom => {
                    evaluated.status = MaterialLineStatus::Ordered;
                    evaluated.total_price = line_total(line, evaluated.unit_price)?;
                    ValidatedLine {
                        line: evaluated,
                        stock_available: false,
                        available_stock: None,
                    }
                }
                LineSource::StockBacked { stock_item_id } => {
                    let ledger = self.catalog.resolve(line.material_class, stock_item_id)?;
                    let item = ledger.snapshot()?;
                    let available = item.reservable_quantity();

                    evaluated.unit_price = item.unit_price;
                    evaluated.total_price = line_total(line, item.unit_price)?;
                    ValidatedLine {
                        line: evaluated,
                        stock_available: available >= line.requested_quantity,
                        available_stock: Some(available),
                    }
                }
            };

            debug!(
                line_id = %line.line_id,
                stock_available = result.stock_available,
                available = ?result.available_stock,
                "物料行校验完成"
            );
            validated.push(result);
        }

        Ok(validated)
    }

    // ==========================================
    // reserve_all - 批量预留（全成或全不成）
    // ==========================================

    /// 为项目批量预留库存
    ///
    /// # 规则
    /// - 项目必须处于 PLANNING
    /// - 数量取自已保存的物料行，充足性在批次锁内重新校验
    /// - 按 (类别, 批次, 行) 升序逐个预留；首个失败即逆序回滚
    /// - 总耗时受 reservation/reserve_timeout_ms 约束，超时同样回滚
    ///
    /// # 错误
    /// - `EngineError::InsufficientStock`: 携带全部不足的物料行
    /// - `EngineError::ReservationTimeout`: 超时（已回滚）
    #[instrument(skip(self, validated_lines), fields(line_count = validated_lines.len()))]
    pub async fn reserve_all(
        &self,
        project_id: &str,
        validated_lines: &[ValidatedLine],
    ) -> EngineResult<ReservationOutcome> {
        let _project_guard = self.project_locks.acquire(&project_id.to_string()).await;

        let mut project = self.project(project_id)?;
        ProjectLifecycle::guard(&project, ProjectOperation::Reserve)?;

        let (mut steps, ordered_line_ids) = self.plan_reserve_steps(&project, validated_lines)?;
        steps.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let timeout_ms = self
            .config
            .get_reserve_timeout_ms()
            .await
            .map_err(config_error)?;

        // applied 位于超时 future 之外，超时后仍可据此回滚
        let mut applied: Vec<AppliedStep> = Vec::with_capacity(steps.len());
        let result = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            apply_in_order(&steps, &mut applied),
        )
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err((failed_idx, err))) => {
                self.rollback(project_id, &steps, &applied).await;
                return Err(match err {
                    EngineError::InsufficientStock { shortages } => {
                        let shortages = collect_shortages(&steps, failed_idx, shortages);
                        warn!(
                            project_id = %project_id,
                            shortage_lines = shortages.len(),
                            "批量预留失败: 库存不足，已回滚"
                        );
                        EngineError::InsufficientStock { shortages }
                    }
                    other => {
                        warn!(project_id = %project_id, error = %other, "批量预留失败，已回滚");
                        other
                    }
                });
            }
            Err(_) => {
                self.rollback(project_id, &steps, &applied).await;
                warn!(
                    project_id = %project_id,
                    timeout_ms = timeout_ms,
                    applied = applied.len(),
                    "批量预留超时，已回滚"
                );
                return Err(EngineError::ReservationTimeout {
                    project_id: project_id.to_string(),
                    timeout_ms,
                });
            }
        }

        let line_prices = match price_lines(&project, &steps, &applied, &ordered_line_ids) {
            Ok(prices) => prices,
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "物料行总价计算失败，已回滚");
                self.rollback(project_id, &steps, &applied).await;
                return Err(e);
            }
        };

        // ===== 落库: 预留记录 + 物料行 + 项目状态 =====
        let now = Utc::now();
        let reservations: Vec<Reservation> = steps
            .iter()
            .map(|step| Reservation {
                reservation_id: Uuid::new_v4().to_string(),
                material_class: step.ledger.material_class(),
                stock_item_id: step.ledger.stock_item_id().to_string(),
                project_id: project_id.to_string(),
                material_line_id: step.line_id.clone(),
                reserved_quantity: step.quantity,
                used_quantity: None,
                unit: project
                    .line(&step.line_id)
                    .map(|l| l.unit.clone())
                    .unwrap_or_default(),
                status: ReservationStatus::Reserved,
                created_at: now,
                updated_at: now,
            })
            .collect();

        if let Err(e) = self.reservation_repo.insert_batch(&reservations) {
            error!(project_id = %project_id, error = %e, "预留记录写入失败，回滚台账");
            self.rollback(project_id, &steps, &applied).await;
            return Err(e.into());
        }

        for step in &steps {
            if let Some(line) = project.line_mut(&step.line_id) {
                line.reserved_quantity = line.requested_quantity;
                line.status = MaterialLineStatus::Reserved;
            }
        }
        for line_id in &ordered_line_ids {
            if let Some(line) = project.line_mut(line_id) {
                line.status = MaterialLineStatus::Ordered;
            }
        }
        for (line_id, (unit_price, total_price)) in line_prices {
            if let Some(line) = project.line_mut(&line_id) {
                line.unit_price = unit_price;
                line.total_price = total_price;
            }
        }

        ProjectLifecycle::advance(&mut project, ProjectOperation::Reserve)?;
        if let Err(e) = self.project_repo.save(&project) {
            error!(project_id = %project_id, error = %e, "项目保存失败，撤销预留");
            self.abandon_reservations(&reservations);
            self.rollback(project_id, &steps, &applied).await;
            return Err(e.into());
        }

        let reservation_ids: Vec<String> =
            reservations.iter().map(|r| r.reservation_id.clone()).collect();
        info!(
            project_id = %project_id,
            reservations = reservations.len(),
            ordered_lines = ordered_line_ids.len(),
            "项目物料预留完成"
        );
        self.publish(project_id, ReservationEventType::Reserved, reservation_ids);

        Ok(ReservationOutcome {
            project_id: project_id.to_string(),
            reservations,
            ordered_line_ids,
        })
    }

    /// 把校验结果映射为项目中已保存的物料行
    fn plan_reserve_steps(
        &self,
        project: &Project,
        validated_lines: &[ValidatedLine],
    ) -> EngineResult<(Vec<ReserveStep>, Vec<String>)> {
        let mut seen = HashSet::new();
        let mut steps = Vec::new();
        let mut ordered_line_ids = Vec::new();

        for validated in validated_lines {
            let line_id = validated.line.line_id.as_str();
            let line = project
                .line(line_id)
                .ok_or_else(|| EngineError::LineNotInProject {
                    project_id: project.project_id.clone(),
                    line_id: line_id.to_string(),
                })?;

            if !seen.insert(line_id) {
                return Err(EngineError::BusinessRuleViolation(format!(
                    "物料行 {} 重复提交",
                    line_id
                )));
            }
            if line.requested_quantity <= Decimal::ZERO {
                return Err(EngineError::InvalidQuantity(format!(
                    "物料行 {} 需求量必须大于 0，实际 {}",
                    line_id, line.requested_quantity
                )));
            }

            match &line.source {
                LineSource::Custom => {
                    line_total(line, line.unit_price)?;
                    ordered_line_ids.push(line.line_id.clone());
                }
                LineSource::StockBacked { stock_item_id } => steps.push(ReserveStep {
                    ledger: self.catalog.resolve(line.material_class, stock_item_id)?,
                    line_id: line.line_id.clone(),
                    quantity: line.requested_quantity,
                }),
            }
        }

        // 批次必须覆盖项目的全部物料行
        let missing: Vec<String> = project
            .material_lines
            .iter()
            .filter(|l| !seen.contains(l.line_id.as_str()))
            .map(|l| l.line_id.clone())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::UnreservedLines {
                project_id: project.project_id.clone(),
                line_ids: missing,
            });
        }

        Ok((steps, ordered_line_ids))
    }

    /// 逆序释放已提交的预留
    async fn rollback(&self, project_id: &str, steps: &[ReserveStep], applied: &[AppliedStep]) {
        for (idx, _) in applied.iter().rev() {
            let step = &steps[*idx];
            if let Err(e) = step.ledger.unreserve(step.quantity).await {
                error!(
                    project_id = %project_id,
                    material_class = %step.ledger.material_class(),
                    stock_item_id = %step.ledger.stock_item_id(),
                    quantity = %step.quantity,
                    error = %e,
                    "回滚预留失败，需人工核对"
                );
            }
        }
        if !applied.is_empty() {
            debug!(project_id = %project_id, rolled_back = applied.len(), "批量预留已回滚");
        }
    }

    /// 作废已写入但未生效的预留记录
    fn abandon_reservations(&self, reservations: &[Reservation]) {
        for r in reservations {
            if let Err(e) = self.reservation_repo.transition_status(
                &r.reservation_id,
                ReservationStatus::Reserved,
                ReservationStatus::Cancelled,
                None,
            ) {
                error!(reservation_id = %r.reservation_id, error = %e, "作废预留记录失败");
            }
        }
    }

    // ==========================================
    // activate - 开工
    // ==========================================

    /// 项目开工: 预留转为使用中，不发生数量流转
    ///
    /// 中途失败时项目保持 RESERVED，重试只处理仍为 RESERVED 的记录
    #[instrument(skip(self))]
    pub async fn activate(&self, project_id: &str) -> EngineResult<Vec<String>> {
        let _project_guard = self.project_locks.acquire(&project_id.to_string()).await;

        let mut project = self.project(project_id)?;
        ProjectLifecycle::guard(&project, ProjectOperation::Activate)?;
        ProjectLifecycle::ensure_lines_reserved(&project)?;

        let mut activated = Vec::new();
        for r in self
            .reservation_repo
            .find_by_project(project_id)?
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Reserved)
        {
            self.reservation_repo.transition_status(
                &r.reservation_id,
                ReservationStatus::Reserved,
                ReservationStatus::Active,
                None,
            )?;
            activated.push(r.reservation_id);
        }

        ProjectLifecycle::advance(&mut project, ProjectOperation::Activate)?;
        self.project_repo.save(&project)?;

        info!(project_id = %project_id, activated = activated.len(), "项目已开工");
        self.publish(project_id, ReservationEventType::Activated, activated.clone());
        Ok(activated)
    }

    // ==========================================
    // complete - 完工
    // ==========================================

    /// 项目完工: 消耗全部使用中的预留
    ///
    /// - 已登记用量的预留消耗 used，其余部分释放回可用
    /// - 未登记用量的预留按全量消耗
    ///
    /// # 错误
    /// - `EngineError::ConsumptionError`: 部分预留结算失败，项目保持 ACTIVE，可重试
    #[instrument(skip(self))]
    pub async fn complete(&self, project_id: &str) -> EngineResult<CompletionOutcome> {
        let _project_guard = self.project_locks.acquire(&project_id.to_string()).await;

        let mut project = self.project(project_id)?;
        ProjectLifecycle::guard(&project, ProjectOperation::Complete)?;
        ProjectLifecycle::ensure_lines_reserved(&project)?;

        let active: Vec<Reservation> = self
            .reservation_repo
            .find_by_project(project_id)?
            .into_iter()
            .filter(|r| r.status == ReservationStatus::Active)
            .collect();

        let mut outcome = CompletionOutcome {
            project_id: project_id.to_string(),
            completed_reservation_ids: Vec::new(),
            consumed_total: Decimal::ZERO,
            released_total: Decimal::ZERO,
        };
        let mut failed = Vec::new();
        let mut last_reason = String::new();

        for r in &active {
            match self.settle_reservation(r).await {
                Ok(released) => {
                    let used = r.settled_usage();
                    outcome.completed_reservation_ids.push(r.reservation_id.clone());
                    outcome.consumed_total += used;
                    outcome.released_total += released;

                    if let Some(line) = project.line_mut(&r.material_line_id) {
                        line.used_quantity = used;
                        line.status = MaterialLineStatus::Completed;
                    }
                }
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        reservation_id = %r.reservation_id,
                        error = %e,
                        "预留结算失败"
                    );
                    failed.push(r.reservation_id.clone());
                    last_reason = e.to_string();
                }
            }
        }

        if !failed.is_empty() {
            // 已结算的物料行进度需要保留，项目状态不变
            if let Err(e) = self.project_repo.save(&project) {
                error!(project_id = %project_id, error = %e, "保存部分完工进度失败");
            }
            return Err(EngineError::ConsumptionError {
                project_id: project_id.to_string(),
                failed_reservations: failed,
                reason: last_reason,
            });
        }

        ProjectLifecycle::advance(&mut project, ProjectOperation::Complete)?;
        self.project_repo.save(&project)?;

        info!(
            project_id = %project_id,
            completed = outcome.completed_reservation_ids.len(),
            consumed = %outcome.consumed_total,
            released = %outcome.released_total,
            "项目已完工"
        );
        self.publish(
            project_id,
            ReservationEventType::Completed,
            outcome.completed_reservation_ids.clone(),
        );
        Ok(outcome)
    }

    /// 结算单条预留: 先认领状态（ACTIVE → COMPLETED），再结算台账；台账失败时撤销认领
    async fn settle_reservation(&self, r: &Reservation) -> EngineResult<Decimal> {
        let used = r.settled_usage();
        let ledger = self.catalog.resolve(r.material_class, &r.stock_item_id)?;

        self.reservation_repo.transition_status(
            &r.reservation_id,
            ReservationStatus::Active,
            ReservationStatus::Completed,
            Some(used),
        )?;

        match ledger.settle(r.reserved_quantity, used).await {
            Ok(released) => Ok(released),
            Err(e) => {
                let reverted = self
                    .reservation_repo
                    .transition_status(
                        &r.reservation_id,
                        ReservationStatus::Completed,
                        ReservationStatus::Active,
                        None,
                    )
                    .and_then(|_| {
                        self.reservation_repo
                            .clear_usage(&r.reservation_id, r.used_quantity)
                    });
                if let Err(revert_err) = reverted {
                    error!(
                        reservation_id = %r.reservation_id,
                        error = %revert_err,
                        "撤销完工认领失败，需人工核对"
                    );
                }
                Err(e)
            }
        }
    }

    // ==========================================
    // 取消
    // ==========================================

    /// 取消单条预留: 释放台账预留量，物料行回到 PLANNED
    ///
    /// 项目已预留/开工时，含 PLANNED 行的项目无法开工或完工，只能整体取消
    #[instrument(skip(self))]
    pub async fn cancel_reservation(&self, reservation_id: &str) -> EngineResult<Reservation> {
        let found = self.reservation(reservation_id)?;
        let _project_guard = self.project_locks.acquire(&found.project_id).await;

        // 持锁后重新读取
        let reservation = self.reservation(reservation_id)?;
        let released = self.cancel_one(&reservation).await?;

        let mut project = self.project(&reservation.project_id)?;
        if !project.status.is_terminal() {
            if let Some(line) = project.line_mut(&reservation.material_line_id) {
                line.reserved_quantity = Decimal::ZERO;
                line.used_quantity = Decimal::ZERO;
                line.status = MaterialLineStatus::Planned;
            }
            self.project_repo.save(&project)?;
        }

        info!(
            project_id = %reservation.project_id,
            reservation_id = %reservation_id,
            released = %released,
            "预留已取消"
        );
        self.publish(
            &reservation.project_id,
            ReservationEventType::Cancelled,
            vec![reservation_id.to_string()],
        );

        self.reservation(reservation_id)
    }

    /// 取消项目: 取消全部未结束预留后项目置为 CANCELLED（物料行保持原样）
    #[instrument(skip(self))]
    pub async fn cancel_project(&self, project_id: &str) -> EngineResult<Vec<String>> {
        let _project_guard = self.project_locks.acquire(&project_id.to_string()).await;

        let mut project = self.project(project_id)?;
        ProjectLifecycle::guard(&project, ProjectOperation::Cancel)?;

        let mut cancelled = Vec::new();
        let mut failed = Vec::new();
        let mut last_reason = String::new();

        for r in self
            .reservation_repo
            .find_by_project(project_id)?
            .into_iter()
            .filter(|r| r.status.is_open())
        {
            match self.cancel_one(&r).await {
                Ok(_) => cancelled.push(r.reservation_id),
                Err(e) => {
                    warn!(
                        project_id = %project_id,
                        reservation_id = %r.reservation_id,
                        error = %e,
                        "取消预留失败"
                    );
                    failed.push(r.reservation_id);
                    last_reason = e.to_string();
                }
            }
        }

        if !failed.is_empty() {
            return Err(EngineError::CancellationError {
                project_id: project_id.to_string(),
                failed_reservations: failed,
                reason: last_reason,
            });
        }

        ProjectLifecycle::advance(&mut project, ProjectOperation::Cancel)?;
        self.project_repo.save(&project)?;

        info!(project_id = %project_id, cancelled = cancelled.len(), "项目已取消");
        self.publish(project_id, ReservationEventType::Cancelled, cancelled.clone());
        Ok(cancelled)
    }

    /// 取消单条预留: 先认领状态，再释放台账；释放失败时撤销认领
    async fn cancel_one(&self, r: &Reservation) -> EngineResult<Decimal> {
        if !r.status.is_open() {
            return Err(EngineError::InvalidReservationState {
                reservation_id: r.reservation_id.clone(),
                actual: r.status,
            });
        }

        let ledger = self.catalog.resolve(r.material_class, &r.stock_item_id)?;
        self.reservation_repo
            .transition_status(&r.reservation_id, r.status, ReservationStatus::Cancelled, None)
            .map_err(|e| claim_error(e, &r.reservation_id))?;

        match ledger.unreserve(r.reserved_quantity).await {
            Ok(released) => Ok(released),
            Err(e) => {
                if let Err(revert_err) = self.reservation_repo.transition_status(
                    &r.reservation_id,
                    ReservationStatus::Cancelled,
                    r.status,
                    None,
                ) {
                    error!(
                        reservation_id = %r.reservation_id,
                        error = %revert_err,
                        "撤销取消认领失败，需人工核对"
                    );
                }
                Err(e)
            }
        }
    }

    // ==========================================
    // check_conflicts - 跨项目超额占用检测（只读）
    // ==========================================

    /// 检测项目物料行与其他项目的未结束预留之间的冲突
    ///
    /// 判定: 其他项目已占用 + 本行需求 > 批次剩余量
    pub fn check_conflicts(&self, project_id: &str) -> EngineResult<Vec<StockConflict>> {
        let project = self.project(project_id)?;
        let mut conflicts = Vec::new();

        for line in &project.material_lines {
            let Some(stock_item_id) = line.source.stock_item_id() else {
                continue;
            };

            let item = self
                .catalog
                .resolve(line.material_class, stock_item_id)?
                .snapshot()?;
            let others: Vec<Reservation> = self
                .reservation_repo
                .find_open_by_stock_item(line.material_class, stock_item_id)?
                .into_iter()
                .filter(|r| r.project_id != project_id)
                .collect();

            let reserved_by_others: Decimal = others.iter().map(|r| r.reserved_quantity).sum();
            let remaining = item.remaining_quantity();
            let demand = reserved_by_others.saturating_add(line.requested_quantity);

            if demand > remaining {
                let conflicting_projects: BTreeSet<String> =
                    others.into_iter().map(|r| r.project_id).collect();
                conflicts.push(StockConflict {
                    line_id: line.line_id.clone(),
                    material_class: line.material_class,
                    stock_item_id: stock_item_id.to_string(),
                    requested_quantity: line.requested_quantity,
                    reserved_by_others,
                    remaining_quantity: remaining,
                    shortage: demand - remaining,
                    conflicting_projects: conflicting_projects.into_iter().collect(),
                });
            }
        }

        if !conflicts.is_empty() {
            debug!(project_id = %project_id, conflicts = conflicts.len(), "检测到库存冲突");
        }
        Ok(conflicts)
    }

    // ==========================================
    // record_usage - 登记部分用量
    // ==========================================

    /// 登记使用中预留的实际用量（0 ≤ used ≤ reserved）
    #[instrument(skip(self))]
    pub async fn record_usage(&self, reservation_id: &str, used: Decimal) -> EngineResult<Reservation> {
        let allowed = self
            .config
            .get_allow_partial_usage()
            .await
            .map_err(config_error)?;
        if !allowed {
            return Err(EngineError::BusinessRuleViolation(
                "未启用部分用量登记".to_string(),
            ));
        }

        let found = self.reservation(reservation_id)?;
        let _project_guard = self.project_locks.acquire(&found.project_id).await;

        let reservation = self.reservation(reservation_id)?;
        if reservation.status != ReservationStatus::Active {
            return Err(EngineError::InvalidReservationState {
                reservation_id: reservation_id.to_string(),
                actual: reservation.status,
            });
        }
        if used < Decimal::ZERO || used > reservation.reserved_quantity {
            return Err(EngineError::InvalidQuantity(format!(
                "用量 {} 超出范围 [0, {}]",
                used, reservation.reserved_quantity
            )));
        }

        self.reservation_repo.record_usage(reservation_id, used)?;

        let mut project = self.project(&reservation.project_id)?;
        if let Some(line) = project.line_mut(&reservation.material_line_id) {
            line.used_quantity = used;
            line.status = MaterialLineStatus::Used;
        }
        self.project_repo.save(&project)?;

        debug!(reservation_id = %reservation_id, used = %used, "用量已登记");
        self.reservation(reservation_id)
    }

    // ==========================================
    // 批次维护
    // ==========================================

    /// 入库（已有批次增加累计入库量）
    pub async fn receive_stock(
        &self,
        material_class: MaterialClass,
        stock_item_id: &str,
        quantity: Decimal,
    ) -> EngineResult<StockItem> {
        self.catalog
            .resolve(material_class, stock_item_id)?
            .receive(quantity)
            .await
    }

    /// 软停用批次: 存在未结束预留时拒绝
    #[instrument(skip(self))]
    pub async fn deactivate_stock_item(
        &self,
        material_class: MaterialClass,
        stock_item_id: &str,
    ) -> EngineResult<StockItem> {
        let ledger = self.catalog.resolve(material_class, stock_item_id)?;

        let open = self
            .reservation_repo
            .find_open_by_stock_item(material_class, stock_item_id)?;
        if !open.is_empty() {
            return Err(EngineError::BusinessRuleViolation(format!(
                "批次 {} 仍被 {} 条预留引用，不能停用",
                stock_item_id,
                open.len()
            )));
        }

        ledger.deactivate().await
    }

    // ==========================================
    // 一致性核对
    // ==========================================

    /// 核对单个批次: 台账预留量 = 未结束预留合计，且数量约束成立
    ///
    /// 系统静止时结果准确；并发流转期间可能出现瞬时偏差
    pub fn audit_stock_item(
        &self,
        material_class: MaterialClass,
        stock_item_id: &str,
    ) -> EngineResult<ConsistencyReport> {
        let item = self
            .catalog
            .resolve(material_class, stock_item_id)?
            .snapshot()?;
        self.audit_item(&item)
    }

    /// 核对全部批次
    pub fn audit_all(&self) -> EngineResult<Vec<ConsistencyReport>> {
        let mut reports = Vec::new();
        for class in self.catalog.classes() {
            for item in self.catalog.list_items(class)? {
                reports.push(self.audit_item(&item)?);
            }
        }

        let inconsistent = reports.iter().filter(|r| !r.is_consistent()).count();
        info!(items = reports.len(), inconsistent = inconsistent, "库存一致性核对完成");
        Ok(reports)
    }

    fn audit_item(&self, item: &StockItem) -> EngineResult<ConsistencyReport> {
        let reservations_reserved: Decimal = self
            .reservation_repo
            .find_open_by_stock_item(item.material_class, &item.stock_item_id)?
            .iter()
            .map(|r| r.reserved_quantity)
            .sum();

        let mut violations = item.invariant_violations();
        if reservations_reserved != item.reserved_quantity {
            violations.push(format!(
                "台账预留量 {} 与未结束预留合计 {} 不一致",
                item.reserved_quantity, reservations_reserved
            ));
        }

        let report = ConsistencyReport {
            material_class: item.material_class,
            stock_item_id: item.stock_item_id.clone(),
            ledger_reserved: item.reserved_quantity,
            reservations_reserved,
            remaining_quantity: item.remaining_quantity(),
            available_quantity: item.available_quantity(),
            violations,
        };

        if !report.is_consistent() {
            error!(
                material_class = %report.material_class,
                stock_item_id = %report.stock_item_id,
                violations = ?report.violations,
                "库存账实不一致"
            );
        }
        Ok(report)
    }

    fn publish(&self, project_id: &str, event_type: ReservationEventType, reservation_ids: Vec<String>) {
        let event = ReservationEvent::new(project_id, event_type, reservation_ids);
        if let Err(e) = self.events.publish(event) {
            warn!(project_id = %project_id, error = %e, "事件发布失败");
        }
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// 按序逐个预留；提交与记录之间没有 await，超时取消不会丢失已提交步骤
async fn apply_in_order(
    steps: &[ReserveStep],
    applied: &mut Vec<AppliedStep>,
) -> Result<(), (usize, EngineError)> {
    for (idx, step) in steps.iter().enumerate() {
        match step.ledger.reserve(step.quantity).await {
            Ok(item) => applied.push((idx, item.unit_price)),
            Err(e) => return Err((idx, e)),
        }
    }
    Ok(())
}

/// 物料行总价（单价 × 需求量），溢出时按数量非法处理
fn line_total(line: &ProjectMaterialLine, unit_price: Decimal) -> EngineResult<Decimal> {
    line.priced_total(unit_price).ok_or_else(|| {
        EngineError::InvalidQuantity(format!(
            "物料行 {} 总价溢出: 单价 {}，数量 {}",
            line.line_id, unit_price, line.requested_quantity
        ))
    })
}

/// 预留成功后的物料行定价: line_id → (单价, 总价)
///
/// 关联库存的行取预留时的批次单价，自定义行沿用原单价
fn price_lines(
    project: &Project,
    steps: &[ReserveStep],
    applied: &[AppliedStep],
    ordered_line_ids: &[String],
) -> EngineResult<HashMap<String, (Decimal, Decimal)>> {
    let stock_priced = applied
        .iter()
        .map(|(idx, price)| (steps[*idx].line_id.as_str(), Some(*price)));
    let custom_priced = ordered_line_ids.iter().map(|id| (id.as_str(), None));

    let mut prices = HashMap::new();
    for (line_id, reserved_price) in stock_priced.chain(custom_priced) {
        let Some(line) = project.line(line_id) else {
            continue;
        };
        let unit_price = reserved_price.unwrap_or(line.unit_price);
        prices.insert(line_id.to_string(), (unit_price, line_total(line, unit_price)?));
    }
    Ok(prices)
}

/// 回滚后收集全部不足的物料行（同一批次多行按累计需求计算）
fn collect_shortages(
    steps: &[ReserveStep],
    failed_idx: usize,
    first_failure: Vec<StockShortage>,
) -> Vec<StockShortage> {
    let mut demanded: HashMap<(MaterialClass, String), Decimal> = HashMap::new();
    let mut shortages = Vec::new();

    for step in steps {
        let key = (
            step.ledger.material_class(),
            step.ledger.stock_item_id().to_string(),
        );
        let prior = demanded.get(&key).copied().unwrap_or(Decimal::ZERO);

        match step.ledger.check_available(step.quantity) {
            Ok(availability) => {
                let available = (availability.available - prior).max(Decimal::ZERO);
                if available < step.quantity {
                    shortages.push(
                        StockShortage::new(key.0, key.1.clone(), step.quantity, available)
                            .for_line(step.line_id.clone()),
                    );
                }
            }
            Err(e) => warn!(
                stock_item_id = %step.ledger.stock_item_id(),
                error = %e,
                "收集缺口时读取批次失败"
            ),
        }

        demanded.insert(key, prior.saturating_add(step.quantity));
    }

    // 并发释放可能让首个失败行在复查时变为充足，仍以实际失败为准
    let failed_line = &steps[failed_idx].line_id;
    if !shortages
        .iter()
        .any(|s| s.line_id.as_deref() == Some(failed_line.as_str()))
    {
        for shortage in first_failure.into_iter().rev() {
            shortages.insert(0, shortage.for_line(failed_line.clone()));
        }
    }

    shortages
}

fn claim_error(err: RepositoryError, reservation_id: &str) -> EngineError {
    if let RepositoryError::InvalidStateTransition { from, .. } = &err {
        if let Some(actual) = ReservationStatus::from_str(from) {
            return EngineError::InvalidReservationState {
                reservation_id: reservation_id.to_string(),
                actual,
            };
        }
    }
    if let RepositoryError::NotFound { .. } = err {
        return EngineError::ReservationNotFound(reservation_id.to_string());
    }
    EngineError::Repository(err)
}

fn config_error(err: ConfigError) -> EngineError {
    EngineError::ConfigError(err.to_string())
}
