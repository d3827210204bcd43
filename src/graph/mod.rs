//! The graph materializer: walks a finished [`crate::TraceResult`] and emits
//! the typed node/edge operations an external graph-database sink would
//! apply.
//!
//! The sink itself — batching, persistence, the vertex/edge API — is a
//! collaborator outside this crate (§6 of the governing spec treats it as an
//! abstract capability). What *is* specified here is the shape of the walk:
//! call-trace, then DCFG, then asset flow, then dataflow, with a transitive
//! closure over each [`DataSource`]'s ancestor chain and its storage/balance
//! history predecessors. [`GraphMaterializer::materialize`] runs that walk
//! against an in-memory [`Vec<GraphOp>`] instead of a live sink; a real sink
//! adapter just replays those ops.
//!
//! Node and edge creation is idempotent: [`GraphMaterializer`] keeps its own
//! id caches and skips anything already emitted, so re-running the walk (or
//! feeding its output to a sink that isn't itself idempotent) is safe.

use alloc::collections::BTreeSet;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::ids::{CallId, DcfgId};
use crate::provenance::{DataSource, DataSourceLocation, Source, SourceRef, Word};
use crate::tracing::call_trace::CallTrace;
use crate::tracing::dataflow::{BalanceLocation, StorageLocation};
use crate::tracing::dcfg::{ContractNodeId, Dcfg, DcfgNodeId};
use crate::tracing::emulator::TraceResult;

/// The typed node kinds the external sink distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// One contract call frame (a [`crate::tracing::dcfg::ContractNode`]).
    ContractCall,
    /// One native-value or ERC-20 asset transfer (a [`crate::tracing::call_trace::Flow`]).
    AssetFlow,
    /// One executed basic-block occurrence (a [`crate::tracing::dcfg::DcfgNode`]).
    Dcfg,
    /// One provenance [`Source`].
    DataSource,
}

/// The edge labels the external sink accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeLabel {
    /// Call-tree parent → child.
    Call,
    /// Asset-flow owning call → the flow.
    Transfer,
    /// Successor dcfg node reached by fallthrough, `JUMP`, or `JUMPI`.
    Jump,
    /// A call node's entry into its own dcfg chain, or a dcfg node's
    /// outgoing call into a child contract node.
    DcfgCall,
    /// The last dcfg node in a call's chain, back to the call node.
    DcfgRet,
    /// A dcfg node to the asset-flow node it produced.
    DcfgToAssetFlow,
    /// A reader (dcfg node or call) to the data source version it read.
    DataflowRead,
    /// The writer (dcfg node for storage, call for balance) to the data
    /// source version it produced.
    DataflowWrite,
    /// A `JUMPI` condition's data source to the dcfg node that branched on it.
    DataflowControl,
    /// An ancestor data source to a data source it influenced.
    DataflowDependency,
    /// A storage/balance data source to the previous version in its history.
    DataflowTransition,
}

impl EdgeLabel {
    /// The wire label string the external sink expects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Transfer => "transfer",
            Self::Jump => "jump",
            Self::DcfgCall => "dcfg_call",
            Self::DcfgRet => "dcfg_ret",
            Self::DcfgToAssetFlow => "dcfg_to_asset_flow",
            Self::DataflowRead => "dataflow:read",
            Self::DataflowWrite => "dataflow:write",
            Self::DataflowControl => "dataflow:control",
            Self::DataflowDependency => "dataflow:dependency",
            Self::DataflowTransition => "dataflow:transition",
        }
    }
}

/// One operation against the external graph sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphOp {
    /// Create a typed node, keyed by `id`.
    CreateNode {
        /// The node's kind.
        kind: NodeKind,
        /// The node's id, unique within its kind.
        id: String,
    },
    /// Create a labeled edge. Edge identity is `label#from#to`.
    CreateEdge {
        /// The edge's label.
        label: EdgeLabel,
        /// Source node id.
        from: String,
        /// Destination node id.
        to: String,
        /// String-valued properties attached to the edge.
        props: Vec<(String, String)>,
    },
}

/// Walks a [`TraceResult`] and builds the ops an external sink would apply,
/// in call-trace → DCFG → asset-flow → dataflow order.
#[derive(Debug, Default)]
pub struct GraphMaterializer {
    ops: Vec<GraphOp>,
    node_ids: BTreeSet<String>,
    edge_ids: BTreeSet<String>,
}

impl GraphMaterializer {
    /// A fresh materializer with no ops recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the full walk and returns the ops collected, in emission order.
    pub fn materialize(mut self, result: &TraceResult) -> Vec<GraphOp> {
        self.build_call_trace_graph(result.traces());
        self.build_dcfg_graph(result.dcfg(), result.traces());
        self.build_dataflow_graph(result);
        self.ops
    }

    fn create_node(&mut self, kind: NodeKind, id: String) {
        if self.node_ids.insert(id.clone()) {
            self.ops.push(GraphOp::CreateNode { kind, id });
        }
    }

    fn create_edge(&mut self, label: EdgeLabel, from: String, to: String, props: Vec<(String, String)>) {
        let key = format!("{}#{from}#{to}", label.as_str());
        if self.edge_ids.insert(key) {
            self.ops.push(GraphOp::CreateEdge { label, from, to, props });
        }
    }

    // -- call-trace ---------------------------------------------------

    fn build_call_trace_graph(&mut self, traces: &[CallTrace]) {
        for trace in traces {
            let node_id = call_node_id(&trace.id);
            self.create_node(NodeKind::ContractCall, node_id.clone());
            if trace.parent < traces.len() {
                let parent_id = call_node_id(&traces[trace.parent].id);
                if parent_id != node_id {
                    self.create_edge(EdgeLabel::Call, parent_id, node_id.clone(), Vec::new());
                }
            }
            for flow in &trace.flows {
                let flow_id = flow_node_id(&trace.id, flow.index);
                self.create_node(NodeKind::AssetFlow, flow_id.clone());
                let props = alloc::vec![
                    (String::from("from"), flow.from.to_string()),
                    (String::from("to"), flow.to.to_string()),
                    (String::from("asset"), flow.asset.to_string()),
                    (String::from("amount"), flow.amount.to_string()),
                ];
                self.create_edge(EdgeLabel::Transfer, node_id.clone(), flow_id, props);
            }
        }
    }

    // -- dcfg -----------------------------------------------------------

    fn build_dcfg_graph(&mut self, dcfg: &Dcfg, traces: &[CallTrace]) {
        let Some(root) = dcfg.root() else { return };
        let mut queue = alloc::collections::VecDeque::new();
        queue.push_back(root);
        let mut visited: BTreeSet<ContractNodeId> = BTreeSet::new();

        while let Some(contract_id) = queue.pop_front() {
            if !visited.insert(contract_id) {
                continue;
            }
            let node = dcfg.contract_node(contract_id);
            for callee in node.callees() {
                queue.push_back(callee);
            }

            let call_id_str = call_node_id(node.call_id());
            let Some(mut cursor) = node.entry() else { continue };

            self.create_edge(EdgeLabel::DcfgCall, call_id_str.clone(), dcfg_node_id(dcfg, cursor), Vec::new());

            let mut last = cursor;
            loop {
                let dcfg_node = dcfg.dcfg_node(cursor);
                self.create_node(NodeKind::Dcfg, dcfg_node_id(dcfg, cursor));

                if let Some(parent) = dcfg_node.parent() {
                    let mut props = Vec::new();
                    if let Some(opcode) = dcfg_node.opcode() {
                        props.push((String::from("opcode"), opcode.to_string()));
                    }
                    if let Some(condition) = dcfg_node.condition() {
                        props.push((String::from("condition"), condition.to_string()));
                    }
                    self.create_edge(EdgeLabel::Jump, dcfg_node_id(dcfg, parent), dcfg_node_id(dcfg, cursor), props);
                }

                for call_ref in dcfg_node.calls() {
                    let callee_call_id = dcfg.contract_node(call_ref.contract_node).call_id();
                    self.create_edge(
                        EdgeLabel::DcfgCall,
                        dcfg_node_id(dcfg, cursor),
                        call_node_id(callee_call_id),
                        alloc::vec![(String::from("pc"), call_ref.pc.to_string())],
                    );
                }

                last = cursor;
                match dcfg_node.child() {
                    Some(child) => cursor = child,
                    None => break,
                }
            }

            self.create_edge(EdgeLabel::DcfgRet, dcfg_node_id(dcfg, last), call_id_str, Vec::new());
        }

        self.build_dcfg_to_asset_flow_edges(dcfg, traces);
    }

    fn build_dcfg_to_asset_flow_edges(&mut self, dcfg: &Dcfg, traces: &[CallTrace]) {
        for trace in traces {
            for flow in &trace.flows {
                if let Some(node_id) = find_dcfg_node(dcfg, &flow.dcfg_id) {
                    self.create_edge(
                        EdgeLabel::DcfgToAssetFlow,
                        dcfg_node_id(dcfg, node_id),
                        flow_node_id(&trace.id, flow.index),
                        Vec::new(),
                    );
                }
            }
        }
    }

    // -- dataflow --------------------------------------------------------

    fn build_dataflow_graph(&mut self, result: &TraceResult) {
        let dataflow = result.dataflow();
        let dcfg = result.dcfg();

        let mut worklist: Vec<SourceRef> = Vec::new();
        let mut seen: BTreeSet<*const Source> = BTreeSet::new();

        for trace in result.traces() {
            for flow in &trace.flows {
                if let Some(tracker) = &flow.amount_tracker {
                    enqueue_data_source(&mut worklist, &mut seen, tracker);
                }
            }
        }
        for tracker in result.jumpi_data_sources().values().flatten() {
            enqueue_data_source(&mut worklist, &mut seen, tracker);
        }

        // Transitive closure: an ancestor chain can pull in storage/balance
        // sources whose own history predecessors introduce further sources,
        // so this keeps expanding until a pass adds nothing new.
        let mut i = 0;
        while i < worklist.len() {
            let source = worklist[i].clone();
            i += 1;

            self.create_node(NodeKind::DataSource, source_node_id(&source));

            if let Some(ancestor) = &source.ancestor {
                for ancestor_ref in ancestor.iter() {
                    self.create_edge(EdgeLabel::DataflowDependency, source_node_id(ancestor_ref), source_node_id(&source), Vec::new());
                    enqueue_source(&mut worklist, &mut seen, ancestor_ref.clone());
                }
            }

            match &source.loc {
                DataSourceLocation::Storage { addr, slot, hid } => {
                    let history = dataflow.get_storage_history(&StorageLocation { addr: *addr, slot: *slot, hid: *hid });
                    if let Some(version) = history.get(*hid) {
                        if let Some(writer) = version.write() {
                            if let Some(node_id) = find_dcfg_node(dcfg, writer) {
                                self.create_edge(EdgeLabel::DataflowWrite, dcfg_node_id(dcfg, node_id), source_node_id(&source), Vec::new());
                            }
                        }
                        for reader in version.reads() {
                            if let Some(node_id) = find_dcfg_node(dcfg, reader) {
                                self.create_edge(EdgeLabel::DataflowRead, dcfg_node_id(dcfg, node_id), source_node_id(&source), Vec::new());
                            }
                        }
                    }
                    if *hid > 0 {
                        if let Some(previous) = history.get(hid - 1).and_then(|v| version_source(v.sources())) {
                            self.create_edge(EdgeLabel::DataflowTransition, source_node_id(&previous), source_node_id(&source), Vec::new());
                            enqueue_source(&mut worklist, &mut seen, previous);
                        }
                    }
                }
                DataSourceLocation::Balance { addr, hid } => {
                    let history = dataflow.get_balance_history(&BalanceLocation { addr: *addr, hid: *hid });
                    if let Some(version) = history.get(*hid) {
                        if let Some(writer) = version.write() {
                            self.create_edge(EdgeLabel::DataflowWrite, call_node_id(writer), source_node_id(&source), Vec::new());
                        }
                        for reader in version.reads() {
                            self.create_edge(EdgeLabel::DataflowRead, call_node_id(reader), source_node_id(&source), Vec::new());
                        }
                    }
                    if *hid > 0 {
                        if let Some(previous) = history.get(hid - 1).and_then(|v| version_source(v.sources())) {
                            self.create_edge(EdgeLabel::DataflowTransition, source_node_id(&previous), source_node_id(&source), Vec::new());
                            enqueue_source(&mut worklist, &mut seen, previous);
                        }
                    }
                }
                _ => {}
            }
        }

        for (dcfg_id_str, condition_source) in result.jumpi_data_sources() {
            let Some(condition_source) = condition_source else { continue };
            let Ok(dcfg_id) = dcfg_id_str.parse::<DcfgId>() else { continue };
            let Some(node_id) = find_dcfg_node(dcfg, &dcfg_id) else { continue };
            let to = dcfg_node_id(dcfg, node_id);
            for source in condition_source.iter() {
                self.create_edge(EdgeLabel::DataflowControl, source_node_id(source), to.clone(), Vec::new());
            }
        }
    }
}

fn enqueue_source(worklist: &mut Vec<SourceRef>, seen: &mut BTreeSet<*const Source>, source: SourceRef) {
    if seen.insert(Rc::as_ptr(&source)) {
        worklist.push(source);
    }
}

fn enqueue_data_source(worklist: &mut Vec<SourceRef>, seen: &mut BTreeSet<*const Source>, ds: &DataSource) {
    for source in ds.iter() {
        enqueue_source(worklist, seen, source.clone());
    }
}

/// The single [`Source`] a storage/balance version's broadcast [`Word`]
/// carries — every cell of such a word points at the same one-`Source`
/// [`DataSource`], so the first populated cell is as good as any other.
fn version_source(word: &Word) -> Option<SourceRef> {
    word.iter().find_map(|cell| cell.as_ref()).and_then(|ds| ds.iter().next().cloned())
}

fn call_node_id(call_id: &CallId) -> String {
    format!("call:{call_id}")
}

fn flow_node_id(owner: &CallId, index: usize) -> String {
    format!("flow:{owner}:{index}")
}

fn dcfg_node_id(dcfg: &Dcfg, id: DcfgNodeId) -> String {
    let node = dcfg.dcfg_node(id);
    let contract = dcfg.contract_node(node.contract_node());
    format!("dcfg:{}", crate::ids::format_dcfg_id(contract.call_id(), node.id(), node.call_count()))
}

fn find_dcfg_node(dcfg: &Dcfg, target: &DcfgId) -> Option<DcfgNodeId> {
    let root = dcfg.root()?;
    let mut stack = alloc::vec![root];
    let mut visited = BTreeSet::new();
    while let Some(contract_id) = stack.pop() {
        if !visited.insert(contract_id) {
            continue;
        }
        let contract = dcfg.contract_node(contract_id);
        if contract.call_id() == target.call_id() {
            let mut cursor = contract.entry();
            while let Some(id) = cursor {
                let node = dcfg.dcfg_node(id);
                if node.id() == target.block_id() && node.call_count() == target.call_count() {
                    return Some(id);
                }
                cursor = node.child();
            }
        }
        stack.extend(contract.callees());
    }
    None
}

fn source_node_id(source: &Source) -> String {
    let loc_key = match &source.loc {
        DataSourceLocation::None => format!("{:p}", source as *const Source),
        DataSourceLocation::IoData { call_id, pos } => format!("io:{call_id}:{pos}"),
        DataSourceLocation::Code { addr, pos } => format!("code:{addr}:{pos}"),
        DataSourceLocation::Storage { addr, slot, hid } => format!("storage:{addr}:{slot}:{hid}"),
        DataSourceLocation::Address(addr) => format!("addr:{addr}"),
        DataSourceLocation::Balance { addr, hid } => format!("balance:{addr}:{hid}"),
        DataSourceLocation::Call(call_id) => format!("call_src:{call_id}"),
    };
    format!("ds:{:?}:{loc_key}", source.ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Header, ReplayConfig, StaticPrecompileRange};
    use crate::ingest::{CallFrame, ExecutionResult, StructLogRes};
    use crate::tracing::emulator::TraceEmulator;
    use alloc::string::ToString;

    fn header() -> Header {
        Header::default()
    }

    fn leaf_frame(from: &str, to: &str, value: &str) -> CallFrame {
        CallFrame {
            kind: "CALL".to_string(),
            from: from.to_string(),
            to: to.to_string(),
            value: value.to_string(),
            gas: "0x5208".to_string(),
            gas_used: "0x5208".to_string(),
            input: "0x".to_string(),
            output: "0x".to_string(),
            error: String::new(),
            calls: Vec::new(),
        }
    }

    fn log(pc: u64, op: &str) -> StructLogRes {
        StructLogRes { pc, op: op.to_string(), gas: 1_000_000, gas_cost: 3, depth: 1, error: None, stack: Some(Vec::new()), memory: Some(Vec::new()), storage: None }
    }

    #[test]
    fn empty_transaction_emits_one_call_node_and_no_edges() {
        let frame = leaf_frame("0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x0");
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: alloc::vec![log(0, "STOP")] };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();

        let ops = GraphMaterializer::new().materialize(&result);
        let node_count = ops.iter().filter(|op| matches!(op, GraphOp::CreateNode { kind: NodeKind::ContractCall, .. })).count();
        assert_eq!(node_count, 1);
        assert!(!ops.iter().any(|op| matches!(op, GraphOp::CreateEdge { label: EdgeLabel::Call, .. })));
    }

    #[test]
    fn native_transfer_emits_an_asset_flow_node_and_transfer_edge() {
        let frame = leaf_frame("0x0000000000000000000000000000000000000001", "0x0000000000000000000000000000000000000002", "0x64");
        let trace = ExecutionResult { gas: 21000, failed: false, return_value: String::new(), struct_logs: alloc::vec![log(0, "STOP")] };
        let result = TraceEmulator::new().execute_trace(&trace, &frame, &header(), &ReplayConfig::new(StaticPrecompileRange)).unwrap();

        let ops = GraphMaterializer::new().materialize(&result);
        assert!(ops.iter().any(|op| matches!(op, GraphOp::CreateNode { kind: NodeKind::AssetFlow, .. })));
        assert!(ops.iter().any(|op| matches!(op, GraphOp::CreateEdge { label: EdgeLabel::Transfer, .. })));
    }

    #[test]
    fn materialize_is_idempotent_under_repeated_ids() {
        let mut materializer = GraphMaterializer::new();
        materializer.create_node(NodeKind::ContractCall, String::from("call:0"));
        materializer.create_node(NodeKind::ContractCall, String::from("call:0"));
        materializer.create_edge(EdgeLabel::Call, String::from("call:0"), String::from("call:1"), Vec::new());
        materializer.create_edge(EdgeLabel::Call, String::from("call:0"), String::from("call:1"), Vec::new());
        assert_eq!(materializer.ops.len(), 2);
    }
}
