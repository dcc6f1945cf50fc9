use worker_rpc::port_allocator;
use worker_rpc::SupervisorConfig;

pub(crate) fn cmd_port(config: &SupervisorConfig) -> anyhow::Result<()> {
    let port = port_allocator::allocate(
        config.preferred_port,
        config.port_range_start,
        config.port_range_end,
    )?;
    println!("{}", port);
    Ok(())
}
