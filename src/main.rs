#[macro_use]
extern crate clap;
#[macro_use]
extern crate log;
extern crate pretty_env_logger;
extern crate agent_dispatch;

use std::fs;
use std::io::Read;
use std::time::Duration;

use clap::{App, Arg};

use agent_dispatch::config;
use agent_dispatch::dispatch::Dispatcher;
use agent_dispatch::protocol::{ParsedReply, ReplyParser, RequestBuilder};

static CONFIG_PATH_ARG: &'static str = "CONFIG";
static AGENT_SPEC_ARG: &'static str = "AGENT";
static INDEX_ARG: &'static str = "INDEX";
static TIMEOUT_ARG: &'static str = "timeout-ms";

/// Sends an empty request body naming the attempt's indexes; a stand-in
/// for a real search-query payload, which is out of scope here.
struct EmptyRequest;

impl RequestBuilder for EmptyRequest {
    fn build(&self, _indexes: &[String]) -> Vec<u8> {
        Vec::new()
    }
}

/// Accepts any reply body without inspecting it; a real caller would
/// parse its own result-set schema here.
struct AcceptAnyReply;

impl ReplyParser for AcceptAnyReply {
    fn parse(&self, body: &[u8]) -> ParsedReply {
        ParsedReply { consumed: body.len(), ok: true, has_warning: false }
    }
}

fn mk_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(Arg::with_name(CONFIG_PATH_ARG)
            .required(true)
            .index(1)
            .help("Dispatcher config file path (YAML or JSON)."))
        .arg(Arg::with_name(AGENT_SPEC_ARG)
            .required(true)
            .index(2)
            .help("Agent spec string, e.g. 'host1:9312|host2:9312[ha_strategy=nodeads]'."))
        .arg(Arg::with_name(INDEX_ARG)
            .required(true)
            .index(3)
            .help("Default index name for mirrors with no explicit index list."))
        .arg(Arg::with_name(TIMEOUT_ARG)
            .long(TIMEOUT_ARG)
            .takes_value(true)
            .default_value("1000")
            .help("Per-phase deadline, in milliseconds."))
}

fn main() {
    drop(pretty_env_logger::init());

    let opts = mk_app().get_matches();
    let config_path = opts.value_of(CONFIG_PATH_ARG).unwrap();
    let agent_spec = opts.value_of(AGENT_SPEC_ARG).unwrap();
    let default_index = opts.value_of(INDEX_ARG).unwrap();
    let timeout_ms: u64 = value_t!(opts, TIMEOUT_ARG, u64).unwrap_or_else(|e| e.exit());

    let config_str = {
        let mut s = String::new();
        fs::File::open(config_path)
            .expect("could not open config file")
            .read_to_string(&mut s)
            .expect("could not read config file");
        s
    };
    let global_config = config::from_str(&config_str).expect("configuration error");

    let dispatcher = Dispatcher::new(global_config);
    let group = dispatcher.configure_group(agent_spec, default_index)
        .expect("could not configure agent group");

    let results = dispatcher.dispatch(&[group],
                                       &EmptyRequest,
                                       &AcceptAnyReply,
                                       Duration::from_millis(timeout_ms),
                                       Duration::from_millis(20));

    for attempt in &results {
        if attempt.success {
            info!("mirror {} replied ok", attempt.mirror_index);
        } else {
            warn!("mirror {} failed: {}",
                  attempt.mirror_index,
                  attempt.fail_message.as_deref().unwrap_or("unknown error"));
        }
    }
}
