use vbft::Vbft;
use vbft_util_error::WhateverResult;

#[tokio::main]
#[snafu::report]
async fn main() -> WhateverResult<()> {
    Vbft::builder().run().await
}
