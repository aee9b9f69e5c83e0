use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_record_sort::{ExternalSorter, ExternalSorterBuilder, MemoryLimitedBufferBuilder, Record, SortError, SortStats};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let record_type: RecordType = arg_parser.value_of_t_or_exit("record_type");
    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));
    let chunk_size = arg_parser.value_of("chunk_size").expect("value has default");
    let fan_in: usize = arg_parser.value_of_t_or_exit("fan_in");
    let run_prefix = arg_parser.value_of("run_prefix").expect("value has default");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");

    let options = SorterOptions {
        buffer: MemoryLimitedBufferBuilder::new(chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64()),
        fan_in,
        run_prefix,
        tmp_dir: tmp_dir.map(path::Path::new),
    };

    let result = match record_type {
        RecordType::I32 => sort::<i32>(&options, input, output),
        RecordType::I64 => sort::<i64>(&options, input, output),
        RecordType::U32 => sort::<u32>(&options, input, output),
        RecordType::U64 => sort::<u64>(&options, input, output),
    };

    match result {
        Ok(stats) => log::info!(
            "sorting completed: {} records, {} runs, {} merge passes",
            stats.records,
            stats.runs,
            stats.merge_passes
        ),
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

struct SorterOptions<'a> {
    buffer: MemoryLimitedBufferBuilder,
    fan_in: usize,
    run_prefix: &'a str,
    tmp_dir: Option<&'a path::Path>,
}

fn sort<T: Record>(options: &SorterOptions, input: &path::Path, output: &path::Path) -> Result<SortStats, SortError> {
    let mut sorter_builder = ExternalSorterBuilder::<T>::new()
        .with_buffer(options.buffer)
        .with_fan_in(options.fan_in)
        .with_run_prefix(options.run_prefix);

    if let Some(tmp_dir) = options.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    let sorter: ExternalSorter<T> = sorter_builder.build()?;
    sorter.sort_file(input, output)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum RecordType {
    I32,
    I64,
    U32,
    U64,
}

impl RecordType {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        RecordType::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <RecordType as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-record-sort")
        .about("external sorter of fixed-width binary records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("record_type")
                .short('r')
                .long("record-type")
                .help("record type, stored in native byte order")
                .takes_value(true)
                .default_value("i32")
                .possible_values(RecordType::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_prefix")
                .short('p')
                .long("run-prefix")
                .help("run file name prefix")
                .takes_value(true)
                .default_value("temp_"),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('f')
                .long("fan-in")
                .help("maximum number of runs merged at once")
                .takes_value(true)
                .default_value("64")
                .validator(|v| match v.parse::<usize>() {
                    Ok(fan_in) if fan_in >= 2 => Ok(()),
                    Ok(_) => Err("fan-in must be at least 2".to_string()),
                    Err(err) => Err(format!("fan-in format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("memory budget of a single run")
                .takes_value(true)
                .default_value("100MiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
