use worker_rpc::{BinaryLocator, BinaryResolution, SupervisorConfig};

pub(crate) fn cmd_locate(config: &SupervisorConfig) {
    let locator = BinaryLocator::from_config(config);
    println!("Binary name: {}", locator.binary_name());
    println!("Packaged:    {}", config.packaged);

    match locator.resolve() {
        BinaryResolution::Native { path } => println!("Native:      {}", path.display()),
        BinaryResolution::Script {
            interpreter,
            script,
        } => println!("Script:      {} {}", interpreter, script.display()),
        BinaryResolution::NotFound { searched } => {
            println!("Not found. Searched:");
            for path in searched {
                println!("  {}", path.display());
            }
        }
    }
}
