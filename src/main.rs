fn main() -> anyhow::Result<()> {
    activity_tracker_lib::run()
}
