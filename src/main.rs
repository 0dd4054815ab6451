fn main() {
    itp_clustering::cli::run();
}
