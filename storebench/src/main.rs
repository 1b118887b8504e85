use anyhow::Result;

fn main() -> Result<()> {
    storebench::cli::execute()
}
