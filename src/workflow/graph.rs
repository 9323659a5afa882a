//! 工作流依赖图
//!
//! 邻接表 + 入度表做拓扑排序；同一层按声明顺序，保证执行顺序可复现。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::workflow::types::*;

/// 工作流依赖图
pub struct WorkflowGraph {
    /// 声明顺序
    order: Vec<StepId>,
    /// 步骤 ID -> 依赖它的步骤
    adjacency: HashMap<StepId, Vec<StepId>>,
    /// 步骤 ID -> 依赖数
    in_degree: HashMap<StepId, usize>,
}

impl WorkflowGraph {
    /// 构建并校验依赖图（重复 ID、未知依赖）
    pub fn new(spec: &WorkflowSpec) -> Result<Self, WorkflowError> {
        let mut order = Vec::with_capacity(spec.steps.len());
        let mut adjacency: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut in_degree: HashMap<StepId, usize> = HashMap::new();

        for step in &spec.steps {
            if in_degree.insert(step.id.clone(), 0).is_some() {
                return Err(WorkflowError::DuplicateStep(step.id.clone()));
            }
            adjacency.insert(step.id.clone(), Vec::new());
            order.push(step.id.clone());
        }

        for step in &spec.steps {
            let deps: HashSet<&StepId> = step.depends_on.iter().collect();
            for dep in deps {
                let dependents =
                    adjacency
                        .get_mut(dep)
                        .ok_or_else(|| WorkflowError::UnknownDependency {
                            step: step.id.clone(),
                            dependency: dep.clone(),
                        })?;
                dependents.push(step.id.clone());
                *in_degree.entry(step.id.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            order,
            adjacency,
            in_degree,
        })
    }

    /// Kahn 拓扑排序；存在环时报 CyclicDependency
    pub fn execution_order(&self) -> Result<Vec<StepId>, WorkflowError> {
        let mut in_degree = self.in_degree.clone();
        let position: HashMap<&StepId, usize> =
            self.order.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut ready: VecDeque<StepId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(*id) == Some(&0))
            .cloned()
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = ready.pop_front() {
            let mut newly_ready = Vec::new();
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            newly_ready.push(dependent.clone());
                        }
                    }
                }
            }
            newly_ready.sort_by_key(|d| position.get(d).copied().unwrap_or(usize::MAX));
            ready.extend(newly_ready);
            sorted.push(id);
        }

        if sorted.len() == self.order.len() {
            Ok(sorted)
        } else {
            Err(WorkflowError::CyclicDependency)
        }
    }
}
