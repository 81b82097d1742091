use anyhow::Result;
use uwsgi_hello::HelloApp;

fn main() -> Result<()> {
    uwsgi_rust::run(HelloApp::new())
}
