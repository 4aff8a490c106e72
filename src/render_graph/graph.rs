//! Render graph definition and compilation

use crate::backend::traits::GraphicsBackend;
use crate::backend::types::TextureDescriptor;
use crate::error::GraphError;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

/// The main render graph structure
pub struct RenderGraph<B: GraphicsBackend> {
    passes: Vec<Box<dyn RenderPass<B>>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,
    screen_width: u32,
    screen_height: u32,
}

impl<B: GraphicsBackend> RenderGraph<B> {
    pub fn new(screen_width: u32, screen_height: u32) -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            screen_width,
            screen_height,
        }
    }

    /// Register an external resource (like swapchain image)
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Declare a graph-owned texture shared between passes
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            desc,
            name: name.to_string(),
        }));
        id
    }

    /// Add a pass to the graph; names must be unique
    pub fn add_pass<P: RenderPass<B> + 'static>(
        &mut self,
        pass: P,
        pass_type: PassType,
    ) -> Result<PassId, GraphError> {
        let name = pass.name().to_string();
        if self.pass_nodes.iter().any(|n| n.name == name) {
            return Err(GraphError::DuplicatePass(name));
        }

        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                inputs: &mut inputs,
                outputs: &mut outputs,
                screen_width: self.screen_width,
                screen_height: self.screen_height,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        Ok(id)
    }

    /// Order passes by their declared accesses.
    ///
    /// A reader depends on the writers of a resource declared before it, or on
    /// all writers when none precede it. A writer depends on earlier readers
    /// (write-after-read) and on the previous writer (write-after-write). Ready
    /// passes are emitted in declaration order.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        let count = self.pass_nodes.len();
        let known: BTreeSet<ResourceId> = self.resources.iter().map(|r| r.id()).collect();

        for node in &self.pass_nodes {
            for access in node.inputs.iter().chain(node.outputs.iter()) {
                if !known.contains(&access.resource) {
                    return Err(GraphError::UnknownResource(format!(
                        "{} (declared by {})",
                        access.resource.0, node.name
                    )));
                }
            }
        }

        let writers_of = |resource: ResourceId| -> Vec<usize> {
            self.pass_nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.writes_resource(resource))
                .map(|(i, _)| i)
                .collect()
        };

        // dependencies[i] = passes that must run before i
        let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];

        for (index, node) in self.pass_nodes.iter().enumerate() {
            for input in &node.inputs {
                let writers = writers_of(input.resource);
                let earlier: Vec<usize> = writers.iter().copied().filter(|&w| w < index).collect();
                let sources = if earlier.is_empty() { writers } else { earlier };
                dependencies[index].extend(sources.into_iter().filter(|&w| w != index));
            }

            for output in &node.outputs {
                let resource = output.resource;
                let previous_writer = (0..index)
                    .rev()
                    .find(|&i| self.pass_nodes[i].writes_resource(resource));
                if let Some(writer) = previous_writer {
                    dependencies[index].insert(writer);
                }
                let readers_since = (previous_writer.map_or(0, |w| w + 1)..index)
                    .filter(|&i| self.pass_nodes[i].reads_resource(resource));
                dependencies[index].extend(readers_since);
            }
        }

        // Kahn's algorithm with a min-heap on declaration index
        let mut in_degree: Vec<usize> = dependencies.iter().map(|d| d.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut sorted = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            sorted.push(index);
            for (other, deps) in dependencies.iter().enumerate() {
                if deps.contains(&index) {
                    in_degree[other] -= 1;
                    if in_degree[other] == 0 {
                        ready.push(Reverse(other));
                    }
                }
            }
        }

        if sorted.len() < count {
            let stuck = (0..count)
                .filter(|i| !sorted.contains(i))
                .map(|i| self.pass_nodes[i].name.clone())
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        let pass_order: Vec<PassId> = sorted.iter().map(|&i| self.pass_nodes[i].id).collect();

        // Lifetimes and usage transitions in execution order
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();
        let mut last_usage: HashMap<ResourceId, ResourceUsage> = HashMap::new();
        let mut barriers = Vec::new();

        for (order, &index) in sorted.iter().enumerate() {
            let node = &self.pass_nodes[index];
            for access in node.inputs.iter().chain(node.outputs.iter()) {
                let lifetime = resource_lifetimes
                    .entry(access.resource)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });
                lifetime.last_use = order;

                if let Some(&previous) = last_usage.get(&access.resource) {
                    if previous != access.usage {
                        barriers.push(Barrier {
                            pass: node.id,
                            resource: access.resource,
                            from: previous,
                            to: access.usage,
                        });
                    }
                }
                last_usage.insert(access.resource, access.usage);
            }
        }

        log::debug!(
            "Compiled render graph: {} passes, {} barriers",
            pass_order.len(),
            barriers.len()
        );

        Ok(CompiledGraph {
            pass_order,
            resource_lifetimes,
            barriers,
        })
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass<B>>] {
        &mut self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass<B>> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }

    /// Resource name for diagnostics
    pub fn resource_name(&self, id: ResourceId) -> Option<&str> {
        self.resources.iter().find(|r| r.id() == id).map(|r| r.name())
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// A usage transition an explicit-barrier API must synchronise before `pass`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub pass: PassId,
    pub resource: ResourceId,
    pub from: ResourceUsage,
    pub to: ResourceUsage,
}

/// Compiled render graph with execution order and resource lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
    pub barriers: Vec<Barrier>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        if let Some(lifetime) = self.resource_lifetimes.get(&resource) {
            step >= lifetime.first_use && step <= lifetime.last_use
        } else {
            false
        }
    }

    /// Barriers to issue before `pass`
    pub fn barriers_before(&self, pass: PassId) -> impl Iterator<Item = &Barrier> {
        self.barriers.iter().filter(move |b| b.pass == pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    struct TestPass {
        name: &'static str,
        reads: Vec<ResourceId>,
        writes: Vec<ResourceId>,
    }

    impl TestPass {
        fn new(name: &'static str, reads: &[ResourceId], writes: &[ResourceId]) -> Self {
            Self {
                name,
                reads: reads.to_vec(),
                writes: writes.to_vec(),
            }
        }
    }

    impl RenderPass<RecordingBackend> for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for &r in &self.reads {
                ctx.read(r, ResourceUsage::TextureRead);
            }
            for &w in &self.writes {
                ctx.write(w, ResourceUsage::RenderTarget);
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext<RecordingBackend>) {}
    }

    fn names(graph: &RenderGraph<RecordingBackend>, compiled: &CompiledGraph) -> Vec<String> {
        compiled
            .pass_order
            .iter()
            .map(|id| graph.get_pass_node(*id).unwrap().name.clone())
            .collect()
    }

    #[test]
    fn test_read_after_write_orders_producer_first() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        let a = graph.register_external("a");
        let b = graph.register_external("b");
        // Consumer declared before its producer
        graph
            .add_pass(TestPass::new("consume", &[b], &[]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("produce", &[a], &[b]), PassType::Graphics)
            .unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), vec!["produce", "consume"]);
    }

    #[test]
    fn test_independent_passes_keep_declaration_order() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        let resources: Vec<ResourceId> = (0..4)
            .map(|i| graph.register_external(&format!("r{i}")))
            .collect();
        for (i, name) in ["p0", "p1", "p2", "p3"].into_iter().enumerate() {
            graph
                .add_pass(TestPass::new(name, &[], &[resources[i]]), PassType::Compute)
                .unwrap();
        }
        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), vec!["p0", "p1", "p2", "p3"]);
    }

    #[test]
    fn test_write_after_read_waits_for_reader() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        let x = graph.register_external("x");
        graph
            .add_pass(TestPass::new("write1", &[], &[x]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("read", &[x], &[]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("write2", &[], &[x]), PassType::Graphics)
            .unwrap();

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), vec!["write1", "read", "write2"]);
        assert!(compiled
            .barriers
            .iter()
            .any(|b| b.from == ResourceUsage::RenderTarget && b.to == ResourceUsage::TextureRead));
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        let x = graph.register_external("x");
        let y = graph.register_external("y");
        graph
            .add_pass(TestPass::new("a", &[x], &[y]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("b", &[y], &[x]), PassType::Graphics)
            .unwrap();

        match graph.compile() {
            Err(GraphError::Cycle(passes)) => {
                assert_eq!(passes, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        graph
            .add_pass(TestPass::new("a", &[], &[]), PassType::Graphics)
            .unwrap();
        assert_eq!(
            graph
                .add_pass(TestPass::new("a", &[], &[]), PassType::Graphics)
                .unwrap_err(),
            GraphError::DuplicatePass("a".into())
        );

        graph
            .add_pass(TestPass::new("b", &[ResourceId(99)], &[]), PassType::Graphics)
            .unwrap();
        assert!(matches!(
            graph.compile(),
            Err(GraphError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_resource_lifetimes() {
        let mut graph = RenderGraph::<RecordingBackend>::new(64, 64);
        let x = graph.register_external("x");
        let y = graph.register_external("y");
        graph
            .add_pass(TestPass::new("a", &[], &[x]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("b", &[x], &[y]), PassType::Graphics)
            .unwrap();
        graph
            .add_pass(TestPass::new("c", &[y], &[]), PassType::Graphics)
            .unwrap();

        let compiled = graph.compile().unwrap();
        assert!(compiled.is_resource_alive(x, 0));
        assert!(compiled.is_resource_alive(x, 1));
        assert!(!compiled.is_resource_alive(x, 2));
        assert_eq!(
            compiled.resource_lifetimes[&y],
            ResourceLifetime {
                first_use: 1,
                last_use: 2
            }
        );
    }
}
