use swim_membership::sim::Simulation;
use swim_membership::{Config, MemberId};

const CLUSTER_SIZE: u32 = 8;
const FAILED: u32 = 5;

fn member(n: u32) -> MemberId {
    return MemberId::new(u32::from_be_bytes([10, 0, 0, n as u8]), 6000);
}

fn print_views(sim: &Simulation) {
    for member_id in sim.node_ids() {
        let Some(node) = sim.node(&member_id) else {
            continue;
        };
        let view: Vec<String> = node.members().member_ids().iter().map(ToString::to_string).collect();
        let state = if sim.is_failed(&member_id) { "failed" } else { "live" };
        println!("{} ({}, heartbeat {}): [{}]", member_id, state, node.heartbeat(), view.join(", "));
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::default().with_t_ping(3).with_eviction_window(24);
    config.validate()?;

    let mut sim = Simulation::new(config);
    for n in 1..=CLUSTER_SIZE {
        sim.add_node(member(n), n as u64);
    }
    sim.start_all(member(1));
    sim.run(20);
    println!("after join, t={}:", sim.now());
    print_views(&sim);

    sim.fail(member(FAILED));
    sim.run(30);
    println!("after failing {}, t={}:", member(FAILED), sim.now());
    print_views(&sim);
    println!("{} messages delivered, {} dropped", sim.delivered(), sim.dropped());
    return Ok(());
}
