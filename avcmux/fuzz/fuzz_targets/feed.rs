#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&control, stream)) = data.split_first() else {
        return;
    };
    let is_keyframe = control & 0x80 != 0;
    let duration_ms = u64::from(control & 0x7f);

    let mut builder = avcmux::FragmentBuilder::new(Vec::new());
    #[cfg_attr(not(fuzzing_repro), allow(unused))]
    match builder.feed(stream, is_keyframe, duration_ms).and_then(|()| builder.feed(stream, false, duration_ms)) {
        Ok(()) => {
            let output = builder.finish().unwrap();
            #[cfg(fuzzing_repro)]
            eprintln!("avcmux returned ok: {len} bytes written", len = output.len());
        }
        Err(error) => match error {
            avcmux::Error::Io(_) => panic!(),
            avcmux::Error::Media(error) => {
                #[cfg(fuzzing_repro)]
                eprintln!("avcmux returned a mux error: {error}\n{error:?}");
            }
        },
    }
});
