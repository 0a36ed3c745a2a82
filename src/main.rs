use anyhow::Result;
use polldiary::console::run_console;

fn main() -> Result<()> {
    run_console()
}
