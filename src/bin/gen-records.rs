use std::fs;
use std::io;
use std::mem;
use std::process;

use bytesize::ByteSize;
use env_logger;
use log;
use rand::{Rng, SeedableRng};

use ext_record_sort::RecordWriter;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let arg_parser = build_arg_parser();

    let output = arg_parser.value_of("output").expect("value has default");
    let count: u64 = if arg_parser.is_present("count") {
        arg_parser.value_of_t_or_exit("count")
    } else {
        let size = arg_parser.value_of("size").expect("value has default");
        size.parse::<ByteSize>().expect("value is pre-validated").as_u64() / mem::size_of::<i32>() as u64
    };
    let mut rng = if arg_parser.is_present("seed") {
        rand::rngs::StdRng::seed_from_u64(arg_parser.value_of_t_or_exit("seed"))
    } else {
        rand::rngs::StdRng::from_entropy()
    };

    let output_stream = match fs::File::create(output) {
        Ok(file) => io::BufWriter::new(file),
        Err(err) => {
            log::error!("output file creation error: {}", err);
            process::exit(1);
        }
    };

    let mut writer = RecordWriter::<i32, _>::new(output_stream);
    for _ in 0..count {
        if let Err(err) = writer.write_record(&rng.gen_range(0..i32::MAX)) {
            log::error!("data saving error: {}", err);
            process::exit(1);
        }
    }

    if let Err(err) = writer.flush() {
        log::error!("data flushing error: {}", err);
        process::exit(1);
    }

    log::info!("generated {} random numbers ({} MiB)", count, count * mem::size_of::<i32>() as u64 / (1024 * 1024));
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("gen-records")
        .about("generates a file of random native-endian i32 records")
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("file to be generated")
                .takes_value(true)
                .default_value("large_input.dat"),
        )
        .arg(
            clap::Arg::new("count")
                .short('n')
                .long("count")
                .help("number of records, takes precedence over --size")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("size")
                .short('s')
                .long("size")
                .help("file size")
                .takes_value(true)
                .default_value("2GiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("seed")
                .long("seed")
                .help("random generator seed")
                .takes_value(true),
        )
        .get_matches()
}
