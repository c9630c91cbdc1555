fn main() -> anyhow::Result<()> {
    attendcam_lib::run()
}
