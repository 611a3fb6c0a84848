use distfem::error::DiscretizationError;
use distfem::parallel::wire::{
    cast_slice, decode_assembly, decode_indices, decode_values, encode_assembly, encode_indices, encode_values,
    read_records, WireMatrixEntry, WireRhsEntry,
};
use distfem::parallel::{Communicator, ExecutionContext, SerialCommunicator, ThreadCommunicator};
use util::run_on_ranks;

#[test]
fn serial_context_is_a_single_rank() {
    let context = ExecutionContext::serial();
    assert_eq!(context.rank(), 0);
    assert_eq!(context.n_ranks(), 1);
    assert!(context.is_root());

    assert_eq!(context.all_gather_usize(7).unwrap(), vec![7]);
    assert_eq!(context.all_reduce_sum(2.5).unwrap(), 2.5);
    assert!(context.exchange(Vec::new()).unwrap().is_empty());
    context.barrier().unwrap();

    assert!(matches!(
        SerialCommunicator.send(1, 0, &[]),
        Err(DiscretizationError::Communication(_))
    ));
    assert!(context.exchange(vec![(0, vec![1])]).is_err());
}

#[test]
fn all_gather_is_ordered_by_rank() {
    let results = run_on_ranks(4, |context| {
        let gathered = context.all_gather_usize(10 * context.rank() + 1).unwrap();
        let vectors = context
            .all_gather_f64s(&vec![context.rank() as f64; context.rank()])
            .unwrap();
        (gathered, vectors)
    });

    for (gathered, vectors) in results {
        assert_eq!(gathered, vec![1, 11, 21, 31]);
        assert_eq!(
            vectors,
            vec![vec![], vec![1.0], vec![2.0, 2.0], vec![3.0, 3.0, 3.0]]
        );
    }
}

#[test]
fn all_reduce_sum_is_identical_on_every_rank() {
    let sums = run_on_ranks(3, |context| {
        context.barrier().unwrap();
        context.all_reduce_sum(0.1 * (context.rank() + 1) as f64).unwrap()
    });
    assert!((sums[0] - 0.6).abs() < 1e-15);
    assert!(sums.iter().all(|sum| sum.to_bits() == sums[0].to_bits()));
}

#[test]
fn exchange_between_symmetric_peers() {
    // Ring of four ranks, every rank talks to both of its neighbours
    let results = run_on_ranks(4, |context| {
        let rank = context.rank();
        let left = (rank + 3) % 4;
        let right = (rank + 1) % 4;
        let outgoing = vec![
            (right, encode_indices(&[rank, right])),
            (left, encode_indices(&[rank, left])),
        ];
        context
            .exchange(outgoing)
            .unwrap()
            .into_iter()
            .map(|(peer, bytes)| (peer, decode_indices(&bytes).unwrap()))
            .collect::<Vec<_>>()
    });

    for (rank, incoming) in results.iter().enumerate() {
        let mut peers: Vec<usize> = vec![(rank + 3) % 4, (rank + 1) % 4];
        peers.sort_unstable();
        assert_eq!(incoming.len(), 2);
        for ((peer, message), expected_peer) in incoming.iter().zip(peers) {
            assert_eq!(*peer, expected_peer);
            assert_eq!(message, &vec![expected_peer, rank]);
        }
    }
}

#[test]
fn mismatched_tags_are_reported() {
    let mut world = ThreadCommunicator::world(2);
    let second = world.pop().unwrap();
    let first = world.pop().unwrap();

    first.send(1, 5, &[1, 2, 3]).unwrap();
    let error = second.receive(0, 6).unwrap_err();
    assert!(matches!(error, DiscretizationError::Communication(message) if message.contains("tag 5")));

    assert!(first.send(2, 5, &[]).is_err());
    first.send(1, 7, &[9]).unwrap();
    assert_eq!(second.receive(0, 7).unwrap(), vec![9]);
}

#[test]
fn wire_records_reject_truncated_messages() {
    let values = [0.5, -1.25, f64::MAX];
    assert_eq!(decode_values(&encode_values(&values)).unwrap(), values.to_vec());

    let mut bytes = encode_indices(&[3, 4]);
    assert_eq!(bytes.len(), 16);
    bytes.pop();
    assert!(matches!(decode_indices(&bytes), Err(DiscretizationError::Communication(_))));
    assert!(decode_values(&[0; 7]).is_err());
}

#[test]
fn wire_records_are_little_endian() {
    let bytes = encode_indices(&[0x0102]);
    assert_eq!(bytes, vec![0x02, 0x01, 0, 0, 0, 0, 0, 0]);
    assert_eq!(encode_values(&[1.0]), 1.0f64.to_le_bytes().to_vec());
}

#[test]
fn unaligned_messages_are_read() {
    let entries = [WireMatrixEntry::new(1, 2, 0.25), WireMatrixEntry::new(7, 0, -3.0)];
    // Shift the records by one byte to break their alignment
    let mut buffer = vec![0u8];
    buffer.extend_from_slice(cast_slice(&entries));
    assert_eq!(read_records::<WireMatrixEntry>(&buffer[1..]).unwrap(), entries.to_vec());
}

#[test]
fn assembly_messages_check_their_length() {
    let matrix = [WireMatrixEntry::new(4, 5, 1.5)];
    let rhs = [WireRhsEntry::new(4, -2.0), WireRhsEntry::new(6, 0.5)];
    let payload = encode_assembly(&matrix, &rhs);
    let (decoded_matrix, decoded_rhs) = decode_assembly(&payload).unwrap();
    assert_eq!(decoded_matrix, matrix.to_vec());
    assert_eq!(decoded_rhs[1].row.get(), 6);
    assert_eq!(decoded_rhs[1].value.get(), 0.5);

    let empty = encode_assembly(&[], &[]);
    assert_eq!(decode_assembly(&empty).unwrap(), (vec![], vec![]));

    for truncated in [&payload[..payload.len() - 1], &payload[..8], &[][..]] {
        assert!(matches!(
            decode_assembly(truncated),
            Err(DiscretizationError::Communication(_))
        ));
    }
    let mut extended = payload.clone();
    extended.extend_from_slice(&[0; 16]);
    assert!(decode_assembly(&extended).is_err());
}
