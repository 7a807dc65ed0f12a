mod config;
mod shell;
mod terminal;

use crate::config::CONFIG;
use crate::shell::Shell;
use anyhow::Result;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    dotenv::dotenv().ok();

    let code = {
        let mut shell = Shell::new(CONFIG.clone())?;
        shell.run()?
    };

    std::process::exit(code)
}
