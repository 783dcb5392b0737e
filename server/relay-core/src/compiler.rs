use std::collections::{HashMap, HashSet, VecDeque};

use relay_types::{Edge, EdgeCondition, HostError, Step};

/// One line of the compiled plan. Branch targets of an EVALUATE step carry
/// `branch_of` and render nested under their predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub label: String,
    pub agent_name: String,
    pub description: String,
    pub branch_of: Option<BranchOf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchOf {
    pub predicate_label: String,
    pub branch: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionPlan {
    pub entries: Vec<PlanEntry>,
    /// step id → assigned label.
    pub labels: HashMap<String, String>,
}

impl ExecutionPlan {
    /// Canonical textual form handed to the orchestrator LLM.
    pub fn to_prompt_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match &entry.branch_of {
                None => lines.push(format!(
                    "{}. [{}] {}",
                    entry.label, entry.agent_name, entry.description
                )),
                Some(branch) => {
                    let branch_label = if branch.branch { "IF-TRUE" } else { "IF-FALSE" };
                    lines.push(format!(
                        "   {branch_label} → {}. [{}] {}",
                        entry.label, entry.agent_name, entry.description
                    ));
                }
            }
        }
        lines.join("\n")
    }

    pub fn is_evaluate_label(&self, label: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.label == label && e.agent_name.eq_ignore_ascii_case("EVALUATE"))
    }
}

/// Compile a workflow DAG into the ordered execution plan.
///
/// Pure and deterministic: the same `{steps, edges}` always yields the
/// same plan and label map. Parallel siblings (children of a node with
/// more than one unconditional out-edge) share an integer step number
/// with `a`, `b`, `c` sub-letters in enqueue order; conditional targets
/// of EVALUATE steps are numbered after their predicate and rendered as
/// nested `IF-TRUE`/`IF-FALSE` lines.
pub fn compile(steps: &[Step], edges: &[Edge]) -> Result<ExecutionPlan, HostError> {
    let mut sorted_steps: Vec<&Step> = steps.iter().collect();
    sorted_steps.sort_by_key(|s| s.order);

    let step_by_id: HashMap<&str, &Step> =
        sorted_steps.iter().map(|s| (s.id.as_str(), *s)).collect();

    validate_conditions(&step_by_id, edges)?;
    detect_cycle(&sorted_steps, edges)?;

    // Keep only edges whose endpoints exist.
    let edges: Vec<&Edge> = edges
        .iter()
        .filter(|e| {
            step_by_id.contains_key(e.from_step_id.as_str())
                && step_by_id.contains_key(e.to_step_id.as_str())
        })
        .collect();

    if edges.is_empty() {
        return Ok(sequential_plan(&sorted_steps));
    }

    let mut outgoing: HashMap<&str, Vec<(&str, Option<EdgeCondition>)>> = HashMap::new();
    let mut outgoing_free: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut connected: HashSet<&str> = HashSet::new();
    let mut has_incoming: HashSet<&str> = HashSet::new();
    for edge in &edges {
        let from = edge.from_step_id.as_str();
        let to = edge.to_step_id.as_str();
        outgoing.entry(from).or_default().push((to, edge.condition));
        if edge.condition.is_none() {
            outgoing_free.entry(from).or_default().push(to);
        }
        connected.insert(from);
        connected.insert(to);
        has_incoming.insert(to);
    }

    let mut branch_targets: HashSet<&str> = HashSet::new();
    for step in &sorted_steps {
        if !step.is_evaluate() {
            continue;
        }
        for &(target, condition) in outgoing.get(step.id.as_str()).into_iter().flatten() {
            if condition.is_some() {
                branch_targets.insert(target);
            }
        }
    }

    let roots: Vec<&str> = sorted_steps
        .iter()
        .filter(|s| connected.contains(s.id.as_str()) && !has_incoming.contains(s.id.as_str()))
        .map(|s| s.id.as_str())
        .collect();

    for step in &sorted_steps {
        if !connected.contains(step.id.as_str()) {
            tracing::debug!("step {} is unreachable, omitting from plan", step.id);
        }
    }

    // BFS with parallel detection. Provisional numbers only order the
    // output; the sequential pass below assigns the final ones.
    struct Visit<'a> {
        step_id: &'a str,
        parent_num: u32,
        sibling_count: usize,
        sibling_index: usize,
    }

    let mut queue: VecDeque<Visit> = VecDeque::new();
    if roots.len() > 1 {
        for (idx, root) in roots.iter().copied().enumerate() {
            queue.push_back(Visit {
                step_id: root,
                parent_num: 0,
                sibling_count: roots.len(),
                sibling_index: idx,
            });
        }
    } else {
        for root in roots.iter().copied() {
            queue.push_back(Visit {
                step_id: root,
                parent_num: 0,
                sibling_count: 0,
                sibling_index: 0,
            });
        }
    }

    struct ProvEntry<'a> {
        step_number: u32,
        sub_letter: Option<char>,
        step_id: &'a str,
    }

    let mut entries: Vec<ProvEntry> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut current_step_num: u32 = 0;

    while let Some(visit) = queue.pop_front() {
        if !visited.insert(visit.step_id) {
            continue;
        }

        let (step_number, sub_letter) = if visit.sibling_count > 1 {
            (
                visit.parent_num + 1,
                Some((b'a' + visit.sibling_index as u8) as char),
            )
        } else {
            current_step_num += 1;
            (current_step_num, None)
        };

        entries.push(ProvEntry {
            step_number,
            sub_letter,
            step_id: visit.step_id,
        });

        let children = outgoing_free
            .get(visit.step_id)
            .cloned()
            .unwrap_or_default();
        if children.len() > 1 {
            for (idx, child) in children.iter().copied().enumerate() {
                queue.push_back(Visit {
                    step_id: child,
                    parent_num: step_number,
                    sibling_count: children.len(),
                    sibling_index: idx,
                });
            }
        } else if let Some(&child) = children.first() {
            queue.push_back(Visit {
                step_id: child,
                parent_num: step_number,
                sibling_count: 0,
                sibling_index: 0,
            });
        }

        // Conditional children are traversed so their subtrees stay in the
        // plan, but they never join the main numbering.
        for &(target, condition) in outgoing.get(visit.step_id).into_iter().flatten() {
            if condition.is_some() {
                queue.push_back(Visit {
                    step_id: target,
                    parent_num: step_number,
                    sibling_count: 0,
                    sibling_index: 0,
                });
            }
        }

        if visit.sibling_count > 1 && visit.sibling_index == visit.sibling_count - 1 {
            current_step_num = step_number;
        }
    }

    entries.sort_by_key(|e| (e.step_number, e.sub_letter.unwrap_or('\0')));

    // Sequential numbering: parallel siblings share a number, branch
    // targets take theirs right after their predicate.
    let mut seq_num: u32 = 0;
    let mut last_orig: Option<u32> = None;
    let mut number_of: HashMap<&str, u32> = HashMap::new();

    for entry in &entries {
        if branch_targets.contains(entry.step_id) {
            continue;
        }
        if last_orig != Some(entry.step_number) {
            seq_num += 1;
            last_orig = Some(entry.step_number);
        }
        number_of.insert(entry.step_id, seq_num);

        let step = step_by_id[entry.step_id];
        if step.is_evaluate() {
            for &(target, condition) in outgoing.get(entry.step_id).into_iter().flatten() {
                if condition.is_some() && !number_of.contains_key(target) {
                    seq_num += 1;
                    number_of.insert(target, seq_num);
                }
            }
        }
    }

    let mut plan = ExecutionPlan::default();
    for entry in &entries {
        if branch_targets.contains(entry.step_id) {
            continue;
        }
        let step = step_by_id[entry.step_id];
        let number = number_of.get(entry.step_id).copied().unwrap_or(0);
        let label = match entry.sub_letter {
            Some(letter) => format!("{number}{letter}"),
            None => number.to_string(),
        };
        plan.labels.insert(step.id.clone(), label.clone());
        plan.entries.push(PlanEntry {
            label: label.clone(),
            agent_name: step.agent_name.clone(),
            description: step.display_description(),
            branch_of: None,
        });

        if step.is_evaluate() {
            for &(target, condition) in outgoing.get(entry.step_id).into_iter().flatten() {
                let Some(condition) = condition else { continue };
                let Some(target_step) = step_by_id.get(target) else {
                    continue;
                };
                let branch_number = number_of.get(target).copied().unwrap_or(0);
                plan.labels
                    .insert(target_step.id.clone(), branch_number.to_string());
                plan.entries.push(PlanEntry {
                    label: branch_number.to_string(),
                    agent_name: target_step.agent_name.clone(),
                    description: target_step.display_description(),
                    branch_of: Some(BranchOf {
                        predicate_label: label.clone(),
                        branch: condition.as_bool(),
                    }),
                });
            }
        }
    }

    Ok(plan)
}

fn sequential_plan(sorted_steps: &[&Step]) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();
    for (i, step) in sorted_steps.iter().enumerate() {
        let label = (i + 1).to_string();
        plan.labels.insert(step.id.clone(), label.clone());
        plan.entries.push(PlanEntry {
            label,
            agent_name: step.agent_name.clone(),
            description: step.display_description(),
            branch_of: None,
        });
    }
    plan
}

fn validate_conditions(
    step_by_id: &HashMap<&str, &Step>,
    edges: &[Edge],
) -> Result<(), HostError> {
    for edge in edges {
        if edge.condition.is_none() {
            continue;
        }
        match step_by_id.get(edge.from_step_id.as_str()) {
            Some(step) if step.is_evaluate() => {}
            Some(step) => {
                return Err(HostError::Validation(format!(
                    "conditional edge out of non-EVALUATE step {}",
                    step.id
                )))
            }
            None => {
                return Err(HostError::Validation(format!(
                    "conditional edge from unknown step {}",
                    edge.from_step_id
                )))
            }
        }
    }
    Ok(())
}

fn detect_cycle(steps: &[&Step], edges: &[Edge]) -> Result<(), HostError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.from_step_id.as_str())
            .or_default()
            .push(edge.to_step_id.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }
    let mut color: HashMap<&str, Color> = steps.iter().map(|s| (s.id.as_str(), Color::White)).collect();

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        color: &mut HashMap<&'a str, Color>,
    ) -> bool {
        color.insert(node, Color::Gray);
        for next in adjacency.get(node).into_iter().flatten() {
            match color.get(next).copied() {
                Some(Color::Gray) => return true,
                Some(Color::White) => {
                    if dfs(next, adjacency, color) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        color.insert(node, Color::Black);
        false
    }

    let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    for id in ids {
        if color.get(id).copied() == Some(Color::White) && dfs(id, &adjacency, &mut color) {
            return Err(HostError::Validation(
                "workflow edges form a cycle".to_string(),
            ));
        }
    }
    Ok(())
}
