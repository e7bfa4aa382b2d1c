// ==========================================
// 物料库存预留系统 - 项目生命周期
// ==========================================
// 状态机: PLANNING → RESERVED → ACTIVE → COMPLETED
//         PLANNING / RESERVED / ACTIVE → CANCELLED
// 红线: 前向流转只在对应批量操作全部成功后发生；COMPLETED 不可取消
// ==========================================

use crate::domain::project::Project;
use crate::domain::types::{MaterialLineStatus, ProjectStatus};
use crate::engine::error::{EngineError, EngineResult};

/// 受生命周期约束的引擎操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectOperation {
    Reserve,
    Activate,
    Complete,
    Cancel,
}

impl ProjectOperation {
    /// 允许执行该操作的项目状态
    pub fn allowed_from(&self) -> &'static [ProjectStatus] {
        match self {
            ProjectOperation::Reserve => &[ProjectStatus::Planning],
            ProjectOperation::Activate => &[ProjectStatus::Reserved],
            ProjectOperation::Complete => &[ProjectStatus::Active],
            ProjectOperation::Cancel => &[
                ProjectStatus::Planning,
                ProjectStatus::Reserved,
                ProjectStatus::Active,
            ],
        }
    }

    /// 操作成功后的目标状态
    pub fn target(&self) -> ProjectStatus {
        match self {
            ProjectOperation::Reserve => ProjectStatus::Reserved,
            ProjectOperation::Activate => ProjectStatus::Active,
            ProjectOperation::Complete => ProjectStatus::Completed,
            ProjectOperation::Cancel => ProjectStatus::Cancelled,
        }
    }

    fn expected_label(&self) -> String {
        self.allowed_from()
            .iter()
            .map(|s| s.to_db_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

// ==========================================
// ProjectLifecycle - 项目状态机
// ==========================================
pub struct ProjectLifecycle;

impl ProjectLifecycle {
    /// 判断状态迁移是否合法
    pub fn can_transition(from: ProjectStatus, to: ProjectStatus) -> bool {
        use ProjectStatus::*;
        matches!(
            (from, to),
            (Planning, Reserved)
                | (Reserved, Active)
                | (Active, Completed)
                | (Planning, Cancelled)
                | (Reserved, Cancelled)
                | (Active, Cancelled)
        )
    }

    /// 校验项目当前状态允许执行操作（无副作用）
    pub fn guard(project: &Project, op: ProjectOperation) -> EngineResult<()> {
        if op.allowed_from().contains(&project.status) {
            Ok(())
        } else {
            Err(EngineError::InvalidProjectState {
                project_id: project.project_id.clone(),
                actual: project.status,
                expected: op.expected_label(),
            })
        }
    }

    /// 开工/完工前校验: 关联库存的物料行不得停留在 PLANNED
    ///
    /// 单条预留被取消后物料行回到 PLANNED，此时只能取消项目
    pub fn ensure_lines_reserved(project: &Project) -> EngineResult<()> {
        let unreserved: Vec<String> = project
            .material_lines
            .iter()
            .filter(|l| l.source.stock_item_id().is_some() && l.status == MaterialLineStatus::Planned)
            .map(|l| l.line_id.clone())
            .collect();

        if unreserved.is_empty() {
            Ok(())
        } else {
            Err(EngineError::UnreservedLines {
                project_id: project.project_id.clone(),
                line_ids: unreserved,
            })
        }
    }

    /// 推进项目状态（仅在批量操作成功后调用）
    pub fn advance(project: &mut Project, op: ProjectOperation) -> EngineResult<ProjectStatus> {
        Self::guard(project, op)?;

        let from = project.status;
        let to = op.target();
        debug_assert!(Self::can_transition(from, to));

        project.status = to;
        tracing::info!(
            project_id = %project.project_id,
            from = %from,
            to = %to,
            "项目状态流转"
        );
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path() {
        let mut project = Project::new("P1", "厂房膜结构");
        ProjectLifecycle::advance(&mut project, ProjectOperation::Reserve).unwrap();
        ProjectLifecycle::advance(&mut project, ProjectOperation::Activate).unwrap();
        ProjectLifecycle::advance(&mut project, ProjectOperation::Complete).unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);

        let err = ProjectLifecycle::advance(&mut project, ProjectOperation::Cancel).unwrap_err();
        assert!(matches!(err, EngineError::InvalidProjectState { .. }));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let mut project = Project::new("P1", "厂房膜结构");
        assert!(ProjectLifecycle::guard(&project, ProjectOperation::Activate).is_err());
        assert!(ProjectLifecycle::guard(&project, ProjectOperation::Complete).is_err());

        ProjectLifecycle::advance(&mut project, ProjectOperation::Reserve).unwrap();
        assert!(ProjectLifecycle::guard(&project, ProjectOperation::Reserve).is_err());
        assert!(!ProjectLifecycle::can_transition(
            ProjectStatus::Active,
            ProjectStatus::Reserved
        ));
    }

    #[test]
    fn test_cancel_from_any_open_state() {
        for op_chain in [
            vec![],
            vec![ProjectOperation::Reserve],
            vec![ProjectOperation::Reserve, ProjectOperation::Activate],
        ] {
            let mut project = Project::new("P1", "x");
            for op in op_chain {
                ProjectLifecycle::advance(&mut project, op).unwrap();
            }
            ProjectLifecycle::advance(&mut project, ProjectOperation::Cancel).unwrap();
            assert_eq!(project.status, ProjectStatus::Cancelled);
        }
    }

    #[test]
    fn test_planned_stock_lines_block_progress() {
        use crate::domain::project::ProjectMaterialLine;
        use crate::domain::types::MaterialClass;
        use rust_decimal_macros::dec;

        let mut project = Project::new("P1", "x")
            .with_line(ProjectMaterialLine::stock_backed(
                "L1", "P1", MaterialClass::Steel, "S1", dec!(5), "kg",
            ))
            .with_line(ProjectMaterialLine::custom(
                "L2", "P1", MaterialClass::Consumable, "卡扣", dec!(3), "pcs", dec!(1),
            ));

        // 自定义行不占库存，不参与校验
        let err = ProjectLifecycle::ensure_lines_reserved(&project).unwrap_err();
        match err {
            EngineError::UnreservedLines { line_ids, .. } => assert_eq!(line_ids, vec!["L1"]),
            other => panic!("Expected UnreservedLines, got {:?}", other),
        }

        project.material_lines[0].status = MaterialLineStatus::Reserved;
        assert!(ProjectLifecycle::ensure_lines_reserved(&project).is_ok());
    }
}
