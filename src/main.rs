fn main() -> anyhow::Result<()> {
    weightlog::cli::run()
}
