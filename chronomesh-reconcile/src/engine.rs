//! The mutation algebra: applies one [`Payload`] to a `(SchemaGraph,
//! StateGraph)` pair in place. This is the core of the system — everything
//! else in the workspace exists to get a payload to this function under
//! the right lock, in the right order.

use crate::error::ReconcileError;
use crate::graph::{SchemaEdge, SchemaGraph, SchemaNode, StateGraph, StateInstance};
use crate::payload::{parse_direct_import, parse_item, split_action, EdgeOp, NodeOp, Payload};
use chronomesh_base::{Config, InstanceId, NodeId, Timestamp};
use serde_json::Value;
use std::collections::BTreeMap;

/// The outcome of one sub-item inside a bulk payload: bulk operations
/// return a per-item success/error breakdown rather than failing atomically.
#[derive(Debug)]
pub struct BulkItemResult {
    pub index: usize,
    pub outcome: Result<(), ReconcileError>,
}

/// Applies an entire request envelope's payload — single or bulk — to
/// `schema`/`state`. Returns one [`BulkItemResult`] per sub-item (a single,
/// non-bulk payload still reports as a one-element vec, so callers have a
/// uniform result shape).
pub fn apply_envelope(
    schema: &mut SchemaGraph,
    state: &mut StateGraph,
    action: &str,
    timestamp: i64,
    raw_payload: &Value,
    config: &Config,
) -> Result<Vec<BulkItemResult>, ReconcileError> {
    let (base_action, is_bulk) = split_action(action)?;

    if base_action == "direct_create" {
        let payload = parse_direct_import(raw_payload)?;
        let outcome = apply_payload(schema, state, payload, timestamp, config);
        return Ok(vec![BulkItemResult { index: 0, outcome }]);
    }

    if is_bulk {
        let items = raw_payload
            .as_array()
            .ok_or_else(|| ReconcileError::MalformedPayload("bulk payload is not an array".into()))?;
        if items.is_empty() {
            return Err(ReconcileError::MalformedPayload("bulk payload is empty".into()));
        }
        let log_every = config.bulk_progress_log_every.max(1);
        let started_at = std::time::Instant::now();
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let outcome = parse_item(base_action, item)
                .and_then(|payload| apply_payload(schema, state, payload, timestamp, config));
            results.push(BulkItemResult { index, outcome });

            let done = index + 1;
            if done % log_every == 0 || done == items.len() {
                let elapsed = started_at.elapsed().as_secs_f64();
                let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
                tracing::info!(done, total = items.len(), rate_per_sec = rate, "bulk apply progress");
            }
        }
        Ok(results)
    } else {
        if !raw_payload.is_object() {
            return Err(ReconcileError::MalformedPayload("payload is not an object".into()));
        }
        let payload = parse_item(base_action, raw_payload)?;
        let outcome = apply_payload(schema, state, payload, timestamp, config);
        Ok(vec![BulkItemResult { index: 0, outcome }])
    }
}

/// Applies one already-parsed [`Payload`].
pub fn apply_payload(
    schema: &mut SchemaGraph,
    state: &mut StateGraph,
    payload: Payload,
    timestamp: i64,
    config: &Config,
) -> Result<(), ReconcileError> {
    match payload {
        Payload::Node(op) => apply_node_op(schema, state, op, timestamp),
        Payload::Edge(op) => apply_edge_op(schema, op, timestamp, config),
        Payload::DirectImport(doc) => apply_direct_import(schema, state, *doc, timestamp),
    }
}

fn apply_node_op(
    schema: &mut SchemaGraph,
    state: &mut StateGraph,
    op: NodeOp,
    timestamp: i64,
) -> Result<(), ReconcileError> {
    match op {
        NodeOp::Create {
            node_id,
            node_type,
            properties,
        } => {
            // Merge-update on an existing id (idempotent replay, L2); the
            // Open Question on duplicate-node semantics is resolved as
            // merge, never reject.
            if let Some(existing) = schema.nodes.get_mut(&node_id) {
                existing.properties.extend(properties);
                existing.updated_at = timestamp;
            } else {
                schema.nodes.insert(
                    node_id.clone(),
                    SchemaNode {
                        node_type: node_type.clone(),
                        properties,
                        created_at: timestamp,
                        updated_at: timestamp,
                    },
                );
            }
            reconcile_if_units_present(schema, state, &node_id, timestamp);
            Ok(())
        }
        NodeOp::Update { node_id, properties } => {
            let existing = schema
                .nodes
                .get_mut(&node_id)
                .ok_or_else(|| ReconcileError::MissingNode(node_id.clone()))?;
            let units_changed = properties
                .get("units_in_chain")
                .map(|v| existing.properties.get("units_in_chain") != Some(v))
                .unwrap_or(false);
            existing.properties.extend(properties);
            existing.updated_at = timestamp;
            if units_changed {
                reconcile_if_units_present(schema, state, &node_id, timestamp);
            }
            Ok(())
        }
        NodeOp::Delete { node_id, cascade } => {
            if !schema.nodes.contains_key(&node_id) {
                return Err(ReconcileError::MissingNode(node_id));
            }
            let mut removed = vec![node_id.clone()];
            if cascade {
                removed.extend(schema.descendants(&node_id));
            }

            // Before removal, evict every instance of every removed node
            // that carried units_in_chain.
            for id in &removed {
                if schema.nodes.get(id).and_then(SchemaNode::units_in_chain).is_some() {
                    reconcile_instances(state, id, "", 0, timestamp, None);
                }
            }

            let removed_set: std::collections::BTreeSet<_> = removed.iter().cloned().collect();
            schema
                .edges
                .retain(|(s, t), _| !removed_set.contains(s) && !removed_set.contains(t));
            for id in &removed {
                schema.nodes.remove(id);
            }
            Ok(())
        }
    }
}

fn reconcile_if_units_present(schema: &SchemaGraph, state: &mut StateGraph, node_id: &NodeId, timestamp: i64) {
    let Some(node) = schema.nodes.get(node_id) else {
        return;
    };
    if let Some(k) = node.units_in_chain() {
        reconcile_instances(state, node_id, &node.node_type, k, timestamp, node.expiry());
    }
}

fn apply_edge_op(
    schema: &mut SchemaGraph,
    op: EdgeOp,
    timestamp: i64,
    config: &Config,
) -> Result<(), ReconcileError> {
    match op {
        EdgeOp::Create {
            source_id,
            target_id,
            edge_type,
            properties,
        } => {
            if !schema.nodes.contains_key(&source_id) {
                return Err(ReconcileError::MissingEndpoint(source_id));
            }
            if !schema.nodes.contains_key(&target_id) {
                return Err(ReconcileError::MissingEndpoint(target_id));
            }
            let key = (source_id, target_id);
            match schema.edges.get_mut(&key) {
                Some(existing) => {
                    existing.relationship_type = edge_type;
                    existing.properties.extend(properties);
                }
                None => {
                    schema.edges.insert(
                        key,
                        SchemaEdge {
                            relationship_type: edge_type,
                            properties,
                        },
                    );
                }
            }
            Ok(())
        }
        EdgeOp::Update {
            source_id,
            target_id,
            edge_type: _edge_type,
            properties,
        } => {
            // edge_type is not consulted here — update never changes
            // relationship_type, only create does.
            let key = (source_id, target_id);
            let mut attempts_left = config.edge_update_retries;
            loop {
                if let Some(existing) = schema.edges.get_mut(&key) {
                    existing.properties.extend(properties);
                    return Ok(());
                }
                if attempts_left == 0 {
                    return Err(ReconcileError::MissingEdge(key.0, key.1));
                }
                attempts_left -= 1;
                tracing::debug!(
                    source = %key.0,
                    target = %key.1,
                    attempts_left,
                    "edge update waiting for endpoint edge to appear"
                );
                std::thread::sleep(config.edge_update_retry_backoff);
            }
        }
        EdgeOp::Delete {
            source_id,
            target_id,
            edge_type,
        } => {
            let key = (source_id.clone(), target_id.clone());
            match schema.edges.get(&key) {
                None => Err(ReconcileError::MissingEdge(source_id, target_id)),
                Some(existing) => {
                    if let Some(want_type) = &edge_type {
                        if &existing.relationship_type != want_type {
                            return Ok(());
                        }
                    }
                    schema.edges.remove(&key);
                    Ok(())
                }
            }
        }
    }
}

fn apply_direct_import(
    schema: &mut SchemaGraph,
    state: &mut StateGraph,
    doc: chronomesh_codec::NodeLinkDocument,
    timestamp: i64,
) -> Result<(), ReconcileError> {
    *schema = SchemaGraph::from_document(&doc);
    let node_ids: Vec<NodeId> = schema.nodes.keys().cloned().collect();
    for node_id in node_ids {
        reconcile_if_units_present(schema, state, &node_id, timestamp);
    }
    Ok(())
}

/// Instance reconciliation: makes `|instances of parent_id|` equal `k`,
/// creating or FIFO-evicting as needed.
pub fn reconcile_instances(
    state: &mut StateGraph,
    parent_id: &NodeId,
    node_type: &str,
    k: i64,
    created_at: i64,
    expiry: Option<i64>,
) {
    let current: Vec<InstanceId> = state.instances_of(parent_id).into_iter().cloned().collect();
    let c = current.len() as i64;

    if c < k {
        let created = Timestamp::from_raw(created_at).unwrap_or(Timestamp(created_at));
        let valid_to = match expiry {
            Some(e) => created.plus_expiry(e),
            None => created.plus_default_expiry(),
        }
        .value();
        for _ in 0..(k - c) {
            state.instances.insert(
                InstanceId::new_v4(),
                StateInstance {
                    parent_id: parent_id.clone(),
                    node_type: node_type.to_string(),
                    created_at,
                    valid_from: created_at,
                    valid_to,
                },
            );
        }
    } else if c > k {
        let to_remove = (c - k) as usize;
        let mut candidates: Vec<(InstanceId, i64, i64)> = current
            .into_iter()
            .map(|id| {
                let inst = &state.instances[&id];
                (id, inst.valid_to, inst.created_at)
            })
            .collect();
        // Ascending valid_to, then created_at, then lexical instance_id.
        candidates.sort_by(|a, b| (a.1, a.2, &a.0).cmp(&(b.1, b.2, &b.0)));
        for (id, _, _) in candidates.into_iter().take(to_remove) {
            state.instances.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> Config {
        let mut c = Config::default();
        c.edge_update_retries = 2;
        c.edge_update_retry_backoff = std::time::Duration::from_millis(1);
        c
    }

    #[test]
    fn s1_create_then_update_units() {
        let mut schema = SchemaGraph::default();
        let mut state = StateGraph::default();
        let config = cfg();

        apply_envelope(
            &mut schema,
            &mut state,
            "create",
            1,
            &json!({"node_id": "A", "node_type": "Parts", "properties": {"units_in_chain": 3, "expiry": 100}}),
            &config,
        )
        .unwrap();
        assert_eq!(state.instances_of(&NodeId("A".into())).len(), 3);
        for inst in state.instances.values() {
            assert_eq!(inst.valid_to, 101);
        }

        apply_envelope(
            &mut schema,
            &mut state,
            "update",
            2,
            &json!({"node_id": "A", "properties": {"units_in_chain": 5}}),
            &config,
        )
        .unwrap();

        let instances: Vec<_> = state.instances.values().collect();
        assert_eq!(instances.len(), 5);
        assert_eq!(instances.iter().filter(|i| i.valid_to == 101).count(), 3);
        assert_eq!(
            instances.iter().filter(|i| i.valid_to == 2 + chronomesh_base::DEFAULT_EXPIRY_SECONDS).count(),
            2
        );
    }

    #[test]
    fn s2_shrink_with_fifo_eviction() {
        let mut state = StateGraph::default();
        let parent = NodeId("A".into());
        reconcile_instances(&mut state, &parent, "Parts", 3, 1, Some(100));
        let survivor_id = {
            let mut ids: Vec<_> = state.instances.keys().cloned().collect();
            ids.sort();
            ids.last().unwrap().clone()
        };
        reconcile_instances(&mut state, &parent, "Parts", 1, 1, Some(100));
        assert_eq!(state.instances.len(), 1);
        assert_eq!(state.instances.keys().next().unwrap(), &survivor_id);
    }

    #[test]
    fn s3_edge_retry_tolerance_inside_bulk() {
        let mut schema = SchemaGraph::default();
        let mut state = StateGraph::default();
        let config = cfg();
        schema.nodes.insert(
            NodeId("A".into()),
            SchemaNode {
                node_type: "Parts".into(),
                properties: BTreeMap::new(),
                created_at: 0,
                updated_at: 0,
            },
        );

        let bulk = json!([
            {"source_id": "A", "target_id": "B", "edge_type": "r", "properties": {}},
            {"node_id": "B", "node_type": "Parts", "properties": {}},
        ]);
        let results = apply_envelope(&mut schema, &mut state, "bulk_create", 1, &bulk, &config).unwrap();
        assert!(results[0].outcome.is_err());
        assert!(results[1].outcome.is_ok());
        assert!(schema.nodes.contains_key(&NodeId("B".into())));

        // The edge create above failed before B existed, so the edge itself
        // was never made. An update against that same edge retries
        // `edge_update_retries` times (the endpoint may still be in flight
        // elsewhere) and then fails, rather than succeeding or hanging.
        let update = json!([{"source_id": "A", "target_id": "B", "edge_type": "r", "properties": {"w": 1}}]);
        let update_results = apply_envelope(&mut schema, &mut state, "bulk_update", 2, &update, &config).unwrap();
        assert!(matches!(update_results[0].outcome, Err(ReconcileError::MissingEdge(_, _))));
    }

    #[test]
    fn s4_cascade_delete() {
        let mut schema = SchemaGraph::default();
        let mut state = StateGraph::default();
        let config = cfg();

        for (id, units) in [("A", 2), ("B", 3), ("C", 0)] {
            apply_envelope(
                &mut schema,
                &mut state,
                "create",
                1,
                &json!({"node_id": id, "node_type": "Parts", "properties": {"units_in_chain": units}}),
                &config,
            )
            .unwrap();
        }
        for (s, t) in [("A", "B"), ("B", "C")] {
            apply_envelope(
                &mut schema,
                &mut state,
                "create",
                1,
                &json!({"source_id": s, "target_id": t, "edge_type": "r", "properties": {}}),
                &config,
            )
            .unwrap();
        }

        apply_envelope(
            &mut schema,
            &mut state,
            "delete",
            2,
            &json!({"node_id": "A", "cascade": true}),
            &config,
        )
        .unwrap();

        for id in ["A", "B", "C"] {
            assert!(!schema.nodes.contains_key(&NodeId(id.into())));
        }
        assert!(state.instances.is_empty());
    }

    #[test]
    fn edge_update_fails_after_retry_budget() {
        let mut schema = SchemaGraph::default();
        schema.nodes.insert(
            NodeId("A".into()),
            SchemaNode {
                node_type: "Parts".into(),
                properties: BTreeMap::new(),
                created_at: 0,
                updated_at: 0,
            },
        );
        let config = cfg();
        let err = apply_edge_op(
            &mut schema,
            EdgeOp::Update {
                source_id: NodeId("A".into()),
                target_id: NodeId("missing".into()),
                edge_type: "r".into(),
                properties: BTreeMap::new(),
            },
            1,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingEdge(_, _)));
    }
}
